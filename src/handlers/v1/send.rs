//! Message dispatch endpoint.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::api::{SendRequest, SendResponse};
use crate::server::AppState;

use super::{authenticate, error_response};

/// POST /api/v1/send
///
/// A device credential sends through its own device; an account credential
/// routes through the most recently seen connected device.
pub async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SendRequest>,
) -> Response {
    let caller = match authenticate(&state, &headers).await {
        Ok(caller) => caller,
        Err(resp) => return resp,
    };

    match state
        .manager
        .send_as(&caller, &req.recipient, &req.message)
        .await
    {
        Ok(receipt) => (
            StatusCode::OK,
            Json(SendResponse {
                message_id: receipt.message_id,
                device_id: receipt.device_id,
                recipient: req.recipient,
                status: "sent".to_string(),
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}
