//! Error-to-HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use ff_admission::QueueRejection;
use ff_core::Error;

use crate::middleware::request_id::current_request_id;

/// Wrapper so handlers can return `Result<T, AppError>`.
///
/// The body's `request_id` is the id of the request being handled, as set
/// by the request-id middleware.
#[derive(Debug)]
pub struct AppError {
    inner: Error,
}

impl AppError {
    pub fn new(inner: Error) -> Self {
        Self { inner }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.inner.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        Self::new(e)
    }
}

impl From<QueueRejection> for AppError {
    fn from(rejection: QueueRejection) -> Self {
        let inner = match rejection {
            QueueRejection::Full { .. } => Error::Unavailable(rejection.to_string()),
            QueueRejection::Duplicate(_) => Error::Conflict(rejection.to_string()),
        };
        Self::new(inner)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.inner, "Server error in API handler");
        }

        let body = json!({
            "error": self.inner.to_string(),
            "code": self.inner.code(),
            "request_id": current_request_id(),
        });

        (status, axum::Json(body)).into_response()
    }
}
