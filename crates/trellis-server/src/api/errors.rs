//! Standardized API error responses.
//!
//! Every handler returns `Result<_, ApiError>`; this module maps the core
//! error kinds onto the status-code table of the API contract.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use trellis_core::error::CoreError;

use crate::error::ServerError;

/// API error wrapper carrying the core kind to the HTTP edge
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl From<ServerError> for ApiError {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Core(core) => ApiError(core),
            other => ApiError(CoreError::Internal(other.to_string())),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

fn code_and_status(err: &CoreError) -> (StatusCode, &'static str) {
    match err {
        CoreError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "ERR_UNAUTHENTICATED"),
        CoreError::Forbidden(_) => (StatusCode::FORBIDDEN, "ERR_FORBIDDEN"),
        CoreError::NotFound(_) => (StatusCode::NOT_FOUND, "ERR_NOT_FOUND"),
        CoreError::Conflict(_) => (StatusCode::CONFLICT, "ERR_CONFLICT"),
        CoreError::Validation(_) => (StatusCode::BAD_REQUEST, "ERR_VALIDATION"),
        CoreError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "ERR_RATE_LIMITED"),
        CoreError::UpstreamUnavailable(_) => (StatusCode::BAD_GATEWAY, "ERR_UPSTREAM_UNAVAILABLE"),
        CoreError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "ERR_TIMEOUT"),
        CoreError::InvalidGraph(_) => (StatusCode::BAD_REQUEST, "ERR_INVALID_GRAPH"),
        CoreError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ERR_INTERNAL"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = code_and_status(&self.0);

        // Internal details never leave the process verbatim
        let message = match &self.0 {
            CoreError::Internal(detail) => {
                tracing::error!("internal error at API edge: {}", detail);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": message,
            "errorDetails": {
                "errorCode": error_code,
                "errorMessage": message,
            }
        }));

        let mut response = (status, body).into_response();
        if let CoreError::RateLimited { retry_after_secs, .. } = &self.0 {
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
