// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
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

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Convert `logcdn_core` errors to HTTP errors
impl From<logcdn_core::Error> for AppError {
    fn from(err: logcdn_core::Error) -> Self {
        use logcdn_core::Error;

        match err {
            Error::NotFound(msg) => Self::not_found(msg),
            Error::AlreadyExists(msg) => Self::conflict(msg),
            Error::InvalidInput(msg) => Self::bad_request(msg),
            Error::Database(e) => {
                tracing::error!("Database error: {}", e);
                Self::internal("Database error")
            }
            Error::Redis(e) => {
                tracing::error!("Redis error: {}", e);
                Self::internal("Service temporarily unavailable")
            }
            other => {
                tracing::error!("Internal error: {}", other);
                Self::internal("Internal server error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_status_mapping() {
        let cases = [
            (logcdn_core::Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (logcdn_core::Error::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (logcdn_core::Error::AlreadyExists("x".into()), StatusCode::CONFLICT),
            (logcdn_core::Error::Storage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status, expected);
        }
    }

    #[test]
    fn test_internal_details_are_not_leaked() {
        let err = AppError::from(logcdn_core::Error::Internal("secret path".into()));
        assert_eq!(err.message, "Internal server error");
    }
}
