use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;

use crate::handlers;
use crate::session::SessionManager;
use crate::store::{CredentialSource, DeviceRecordStore};

// ============================================================================
// Application State
// ============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub manager: SessionManager,
    pub records: Arc<dyn DeviceRecordStore>,
    pub credentials: Arc<dyn CredentialSource>,
}

// ============================================================================
// Server Setup
// ============================================================================

pub fn build_app(state: AppState, request_timeout_seconds: u64) -> Router {
    let api_v1 = Router::new()
        .route(
            "/devices/{device_id}/connect",
            post(handlers::v1::connect_device),
        )
        .route(
            "/devices/{device_id}/disconnect",
            post(handlers::v1::disconnect_device),
        )
        .route(
            "/devices/{device_id}/status",
            get(handlers::v1::get_device_status),
        )
        .route("/devices/{device_id}/qr", get(handlers::v1::get_device_qr))
        .route("/send", post(handlers::v1::send_message))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .layer(DefaultBodyLimit::max(256 * 1024));

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/version", get(handlers::version))
        .nest("/api/v1", api_v1)
        .with_state(state)
}
