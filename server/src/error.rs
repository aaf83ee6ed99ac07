//! Error types for the FilterSync server.
//!
//! # Error Types
//!
//! - [`ConfigError`] - Configuration errors (invalid values, unreadable seed)
//! - [`ApiError`] - Request failures, each mapped to an HTTP status

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

/// Errors that occur while loading server configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// Port number is invalid.
    #[error("invalid port number: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),

    /// The seed file could not be read or parsed.
    #[error("failed to load seed file {path}: {message}")]
    Seed { path: String, message: String },
}

/// Errors returned by route handlers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The application, filter or counter does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request body was well-formed JSON but semantically invalid.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unexpected internal failure.
    #[error("internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the response body.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "invalid_request",
            Self::Internal(_) => "internal",
        }
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            debug!(error = %self, "Request rejected");
        }
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_status_codes() {
        assert_eq!(ApiError::not_found("app").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::validation("dup").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::internal("x").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn api_error_display() {
        assert_eq!(
            ApiError::not_found("unknown app 'tasks'").to_string(),
            "not found: unknown app 'tasks'"
        );
        assert_eq!(ApiError::validation("dup").code(), "invalid_request");
    }

    #[tokio::test]
    async fn api_error_renders_json_body() {
        let response = ApiError::validation("duplicate filter key 'mine'").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "invalid_request");
        assert_eq!(json["error"], "validation error: duplicate filter key 'mine'");
    }

    #[test]
    fn config_error_from_parse_int() {
        let err: ConfigError = "abc".parse::<u16>().unwrap_err().into();
        assert!(matches!(err, ConfigError::InvalidPort(_)));
    }
}
