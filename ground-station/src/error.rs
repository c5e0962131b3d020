//! JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use telecommand_shared::CommandError;
use tracing::error;

/// An error rendered as `{"error": "<reason>"}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<CommandError> for ApiError {
    fn from(err: CommandError) -> Self {
        let status = match &err {
            CommandError::Validation(_) | CommandError::InvalidTransition { .. } => {
                StatusCode::BAD_REQUEST
            }
            CommandError::NotFound(_) => StatusCode::NOT_FOUND,
            CommandError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CommandError::ExecutorUnavailable(_) | CommandError::ExecutorTimeout { .. } => {
                StatusCode::BAD_GATEWAY
            }
        };

        let message = match err {
            // Validation text is for the operator, not prefixed
            CommandError::Validation(reason) => reason,
            other => other.to_string(),
        };
        Self::new(status, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("[GROUND] {} {}", self.status, self.message);
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
