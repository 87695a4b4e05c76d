//! Collector Error Types
//!
//! Errors for the reference collector and their conversion to HTTP
//! responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Collector error types
#[derive(Error, Debug)]
pub enum CollectorError {
    /// Payload was well-formed JSON but not acceptable
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO error (binding the listener, serving)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error details
#[derive(Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl IntoResponse for CollectorError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            CollectorError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            CollectorError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
        };

        tracing::warn!(error_code = %code, error_message = %self, "Rejected payload");

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: self.to_string(),
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for collector operations
pub type CollectorResult<T> = Result<T, CollectorError>;
