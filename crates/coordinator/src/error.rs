//! Error handling for the coordinator web interface

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Result type alias for coordinator operations
pub type WebResult<T> = Result<T, WebError>;

/// Coordinator error types, mapped to HTTP status codes in `IntoResponse`
#[derive(Debug, Error)]
pub enum WebError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Authentication required")]
    AuthMissing,

    #[error("Invalid or expired token")]
    AuthInvalid,

    #[error("Token has been revoked")]
    AuthRevoked,

    #[error("Authorization error: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No work available")]
    NoWork,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upload conflict: {0}")]
    UploadConflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            WebError::AuthMissing => (StatusCode::BAD_REQUEST, self.to_string()),
            WebError::AuthInvalid | WebError::AuthRevoked | WebError::Jwt(_) => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            WebError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            WebError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            WebError::NoWork => (StatusCode::NO_CONTENT, String::new()),
            WebError::BadRequest(_) | WebError::Json(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            WebError::UploadConflict(_) => (StatusCode::FORBIDDEN, self.to_string()),
            WebError::Database(_) | WebError::Io(_) | WebError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        if status == StatusCode::NO_CONTENT {
            return status.into_response();
        }

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<&str> for WebError {
    fn from(msg: &str) -> Self {
        WebError::Internal(msg.to_string())
    }
}

impl From<String> for WebError {
    fn from(msg: String) -> Self {
        WebError::Internal(msg)
    }
}
