//! Device lifecycle endpoints.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::api::{ConnectRequest, DeviceStatusResponse, QrResponse};
use crate::server::AppState;

use super::{authenticate, authorize_device, error_response};

/// POST /api/v1/devices/{device_id}/connect
pub async fn connect_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ConnectRequest>,
) -> Response {
    let caller = match authenticate(&state, &headers).await {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize_device(&state, &caller, &device_id).await {
        return resp;
    }

    match state
        .manager
        .connect(&device_id, &req.name, req.phone.as_deref())
        .await
    {
        Ok(status) => (
            StatusCode::OK,
            Json(DeviceStatusResponse { device_id, status }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/v1/devices/{device_id}/disconnect
pub async fn disconnect_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let caller = match authenticate(&state, &headers).await {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize_device(&state, &caller, &device_id).await {
        return resp;
    }

    let status = state.manager.disconnect(&device_id).await;
    (
        StatusCode::OK,
        Json(DeviceStatusResponse { device_id, status }),
    )
        .into_response()
}

/// GET /api/v1/devices/{device_id}/status
pub async fn get_device_status(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let caller = match authenticate(&state, &headers).await {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize_device(&state, &caller, &device_id).await {
        return resp;
    }

    match state.manager.get_status(&device_id).await {
        Ok(status) => (
            StatusCode::OK,
            Json(DeviceStatusResponse { device_id, status }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /api/v1/devices/{device_id}/qr
pub async fn get_device_qr(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let caller = match authenticate(&state, &headers).await {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };
    if let Err(resp) = authorize_device(&state, &caller, &device_id).await {
        return resp;
    }

    match state.manager.get_qr(&device_id).await {
        Ok(qr) => (StatusCode::OK, Json(QrResponse { device_id, qr })).into_response(),
        Err(e) => error_response(e),
    }
}
