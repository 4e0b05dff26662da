//! Error handling for the management API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

use courier_core::CourierError;

/// API error type.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    // Common error constructors
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", message)
    }

    /// The runtime was detached for shutdown.
    pub fn shutting_down() -> Self {
        Self::unavailable("Delivery runtime is shutting down")
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.status, self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = %self.code, message = %self.message, "Request failed");
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code,
                message: self.message,
            },
        };

        (self.status, Json(body)).into_response()
    }
}

// Core errors keep their structured code in the response body
impl From<CourierError> for ApiError {
    fn from(err: CourierError) -> Self {
        let code = err.code().as_str();

        match err {
            CourierError::Configuration { message, .. } => {
                ApiError::new(StatusCode::BAD_REQUEST, code, message)
            }
            CourierError::Validation { message, .. } => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, code, message)
            }
            CourierError::NotFound { message, .. } => {
                ApiError::new(StatusCode::NOT_FOUND, code, message)
            }
            CourierError::Forbidden { message, .. } => {
                ApiError::new(StatusCode::FORBIDDEN, code, message)
            }
            CourierError::Database { message, .. } => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                code,
                format!("Database error: {}", message),
            ),
            CourierError::Network { message, .. } => ApiError::new(
                StatusCode::BAD_GATEWAY,
                code,
                format!("Network error: {}", message),
            ),
            CourierError::Scheduler(msg) => {
                ApiError::internal(format!("Scheduler error: {}", msg))
            }
            CourierError::Io(e) => ApiError::internal(format!("IO error: {}", e)),
            CourierError::Serialization(e) => {
                ApiError::internal(format!("Serialization error: {}", e))
            }
            CourierError::Internal(msg) => ApiError::internal(msg),
        }
    }
}

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
