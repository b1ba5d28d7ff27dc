//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service, and how it is
//! rendered as an HTTP response.

use crate::config::ConfigError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;
use tutor_core::error::CoreError;
use tutor_core::ports::PortError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// A refusal or failure reported by one of the core services.
    #[error("{0}")]
    Core(#[from] CoreError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Building one of the HTTP clients failed.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Core(CoreError::NotAuthorized) | Self::Port(PortError::Unauthorized) => StatusCode::FORBIDDEN,
            Self::Core(CoreError::NotFound(_)) | Self::Port(PortError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Core(CoreError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            Self::Core(CoreError::GenerationInProgress { .. }) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal details stay in the logs.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_statuses() {
        let cases = [
            (ApiError::from(CoreError::NotAuthorized), StatusCode::FORBIDDEN),
            (ApiError::from(CoreError::NotFound("Section 3".into())), StatusCode::NOT_FOUND),
            (ApiError::from(CoreError::InvalidRequest("vide".into())), StatusCode::BAD_REQUEST),
            (
                ApiError::from(CoreError::GenerationInProgress { section_id: 3 }),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::from(CoreError::Port(PortError::ReadTimeout("ollama".into()))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ApiError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(error.status(), status, "{}", error);
        }
    }
}
