//! V1 API handlers.

mod devices;
mod send;

pub use devices::{connect_device, disconnect_device, get_device_qr, get_device_status};
pub use send::send_message;

use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};

use crate::handlers::problem_details;
use crate::server::AppState;
use crate::session::SessionError;
use crate::store::Caller;

/// Resolve the bearer credential on a request into a caller identity.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Caller, Response> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| {
            problem_details::unauthorized("missing bearer token").into_response()
        })?;

    match state.credentials.resolve(token).await {
        Ok(Some(caller)) => Ok(caller),
        Ok(None) => Err(problem_details::unauthorized("invalid token").into_response()),
        Err(e) => Err(problem_details::internal_error(e.to_string()).into_response()),
    }
}

/// Check that a caller may operate on the given device.
///
/// An account credential must own the device; a device credential must be
/// for that exact device. Foreign devices are reported as not found rather
/// than forbidden, so tokens cannot probe for ids.
async fn authorize_device(
    state: &AppState,
    caller: &Caller,
    device_id: &str,
) -> Result<(), Response> {
    let owned = match caller {
        Caller::Device {
            device_id: token_device,
            ..
        } => token_device == device_id,
        Caller::Account { user_id } => match state.records.get(device_id).await {
            Ok(Some(record)) => &record.user_id == user_id,
            Ok(None) => false,
            Err(e) => {
                return Err(problem_details::internal_error(e.to_string()).into_response());
            }
        },
    };

    if owned {
        Ok(())
    } else {
        Err(problem_details::not_found(format!("device '{device_id}' not found")).into_response())
    }
}

/// Map a session operation failure onto a problem-details response.
fn error_response(err: SessionError) -> Response {
    match &err {
        SessionError::DeviceNotFound(_) => problem_details::not_found(err.to_string()),
        SessionError::DeviceNotConnected(_)
        | SessionError::NoConnectedDevice(_)
        | SessionError::AlreadyExists(_)
        | SessionError::PairingExhausted(_) => problem_details::conflict(err.to_string()),
        SessionError::EmptyMessage => problem_details::bad_request(err.to_string()),
        SessionError::Client(_) | SessionError::Store(_) => {
            problem_details::internal_error(err.to_string())
        }
    }
    .into_response()
}
