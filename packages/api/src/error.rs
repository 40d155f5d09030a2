// ABOUTME: Application error type mapping session failures to HTTP responses
// ABOUTME: Sanitizes internal details so executor and filesystem errors never leak to clients

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rce_sandbox::SessionError;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Error type returned by every handler
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid API Key")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unprocessable request: {0}")]
    Unprocessable(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Error body, shaped like `{"detail": "..."}`
#[derive(Debug, Serialize)]
struct ErrorResponse {
    detail: String,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Session(session_error) => match session_error {
                SessionError::CapacityExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
                SessionError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                SessionError::FileNotFound(_) => StatusCode::NOT_FOUND,
                SessionError::Provisioning(_)
                | SessionError::Execution(_)
                | SessionError::Provider(_)
                | SessionError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Client-facing message (sanitized for external consumption)
    fn to_user_message(&self) -> String {
        match self {
            AppError::Unauthorized => "Invalid API Key".to_string(),
            AppError::BadRequest(msg) | AppError::Unprocessable(msg) => msg.clone(),
            AppError::Session(session_error) => match session_error {
                SessionError::CapacityExceeded { .. } | SessionError::InvalidInput(_) => {
                    session_error.to_string()
                }
                SessionError::FileNotFound(name) => format!("File not found: {}", name),
                SessionError::Provisioning(_) => {
                    "Failed to start sandbox. Please contact an administrator.".to_string()
                }
                SessionError::Execution(_) => {
                    "An internal error occurred during code execution.".to_string()
                }
                SessionError::Provider(_) | SessionError::Io(_) => {
                    "An internal server error occurred".to_string()
                }
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!(status = %status, "Request failed: {}", self);
        } else {
            warn!(status = %status, "Request rejected: {}", self);
        }

        let body = ErrorResponse {
            detail: self.to_user_message(),
        };
        (status, Json(body)).into_response()
    }
}
