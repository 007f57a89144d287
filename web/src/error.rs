//! HTTP error mapping.
//!
//! Domain errors carry their own fixed user messages; this module only
//! picks status codes and wire codes. Internal message text goes to the
//! log, never to the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cartpilot_core::error::{CopilotError, ErrorKind};
use serde::Serialize;
use std::fmt;

/// Application error for web handlers.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    /// Create an error.
    #[must_use]
    pub const fn new(status: StatusCode, code: &'static str, message: String) -> Self {
        Self {
            status,
            code,
            message,
        }
    }

    /// 422 for malformed requests.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "VALIDATION_ERROR",
            message.into(),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl From<CopilotError> for AppError {
    fn from(error: CopilotError) -> Self {
        let (status, code) = match error.kind {
            ErrorKind::TabNotFound => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND"),
            ErrorKind::InvalidTransition => (StatusCode::CONFLICT, "INVALID_STATE"),
            ErrorKind::NotLoggedIn | ErrorKind::SessionExpired | ErrorKind::LoginRequired => {
                (StatusCode::CONFLICT, "NOT_LOGGED_IN")
            },
            ErrorKind::Timeout | ErrorKind::Offline | ErrorKind::ServerError => {
                (StatusCode::SERVICE_UNAVAILABLE, "UPSTREAM_UNAVAILABLE")
            },
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        tracing::warn!(kind = ?error.kind, message = %error.message, "request failed");
        Self::new(status, code, error.user_message().to_string())
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}
