//! Domain error types for server operations.
//!
//! Startup failures are wrapped in a rootcause `Report` and end the process.
//! Request failures are converted to responses and never expose internals.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

/// Errors that stop the server from starting or serving.
#[derive(Debug)]
pub enum StartupError {
    /// Configuration is missing or invalid.
    Configuration { details: String },
    /// Could not connect to the database.
    Database { details: String },
    /// Migrations failed.
    Migration { details: String },
    /// A provider or the gateway could not be built.
    Gateway { details: String },
    /// The listener could not bind.
    Bind { address: String, details: String },
    /// The server stopped with an error.
    Serve { details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { details } => write!(f, "invalid configuration: {details}"),
            Self::Database { details } => write!(f, "database connection failed: {details}"),
            Self::Migration { details } => write!(f, "database migration failed: {details}"),
            Self::Gateway { details } => write!(f, "gateway setup failed: {details}"),
            Self::Bind { address, details } => {
                write!(f, "failed to bind to {address}: {details}")
            }
            Self::Serve { details } => write!(f, "server error: {details}"),
        }
    }
}

impl std::error::Error for StartupError {}

/// Errors returned by route handlers.
#[derive(Debug)]
pub enum ApiError {
    /// No user is signed in.
    NotAuthenticated,
    /// The requested resource does not exist.
    NotFound { what: String },
    /// The connection store failed.
    Storage { details: String },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAuthenticated => write!(f, "not authenticated"),
            Self::NotFound { what } => write!(f, "{what} not found"),
            Self::Storage { details } => write!(f, "storage error: {details}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotAuthenticated => (StatusCode::UNAUTHORIZED, self.to_string()),
            Self::NotFound { .. } => (StatusCode::NOT_FOUND, self.to_string()),
            Self::Storage { details } => {
                tracing::error!(%details, "storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_hide_details() {
        let response = ApiError::Storage {
            details: "connection refused".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn startup_errors_name_the_address() {
        let err = StartupError::Bind {
            address: "0.0.0.0:80".to_string(),
            details: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("0.0.0.0:80"));
    }
}
