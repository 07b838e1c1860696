//! Problem-details style JSON error bodies.
//!
//! Every error response carries the same shape so clients can handle
//! failures uniformly.

use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    pub title: String,
    pub status: u16,
    pub detail: String,
}

fn problem(
    status: StatusCode,
    title: &str,
    detail: impl Into<String>,
) -> (StatusCode, Json<ProblemDetails>) {
    (
        status,
        Json(ProblemDetails {
            title: title.to_string(),
            status: status.as_u16(),
            detail: detail.into(),
        }),
    )
}

pub fn bad_request(detail: impl Into<String>) -> (StatusCode, Json<ProblemDetails>) {
    problem(StatusCode::BAD_REQUEST, "Bad Request", detail)
}

pub fn unauthorized(detail: impl Into<String>) -> (StatusCode, Json<ProblemDetails>) {
    problem(StatusCode::UNAUTHORIZED, "Unauthorized", detail)
}

pub fn not_found(detail: impl Into<String>) -> (StatusCode, Json<ProblemDetails>) {
    problem(StatusCode::NOT_FOUND, "Not Found", detail)
}

pub fn conflict(detail: impl Into<String>) -> (StatusCode, Json<ProblemDetails>) {
    problem(StatusCode::CONFLICT, "Conflict", detail)
}

pub fn internal_error(detail: impl Into<String>) -> (StatusCode, Json<ProblemDetails>) {
    problem(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error", detail)
}
