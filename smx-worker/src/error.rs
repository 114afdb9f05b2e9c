//! HTTP-facing error type for the worker API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid bearer token (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Unknown job id (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed job request (422)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<smx_common::Error> for ApiError {
    fn from(err: smx_common::Error) -> Self {
        use smx_common::Error;
        match err {
            Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::Validation(msg) => ApiError::Validation(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
