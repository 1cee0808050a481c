//! Centralized error types for the Wavegate core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type for the Wavegate server.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum WavegateError {
    /// Connection refused by admission policy (ban, password, caps, mode gate).
    #[error("Admission denied: {0}")]
    Admission(String),

    /// Upstream RTP/status ingest failure (socket down, parse failure).
    #[error("Ingest error: {0}")]
    Ingest(String),

    /// Client sent an invalid or malformed control message.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Requested demodulation mode does not exist or is not permitted.
    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    /// Requested passband violates the mode's constraints.
    #[error("Invalid passband: {0}")]
    InvalidPassband(String),

    /// Session evicted for sustained backpressure or consumer overload.
    #[error("Session overloaded: {0}")]
    Overloaded(String),

    /// Opus/zstd encoder failure; the offending frame is dropped.
    #[error("Encoder error: {0}")]
    Encoder(String),

    /// DX-cluster protocol failure (unparseable line, socket error).
    #[error("DX cluster error: {0}")]
    DxCluster(String),

    /// Referenced session id does not exist.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Audio extension name is not registered.
    #[error("Unknown audio extension: {0}")]
    UnknownExtension(String),

    /// Server configuration error (missing or inconsistent settings).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WavegateError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Admission(_) => "admission_denied",
            Self::Ingest(_) => "ingest_error",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidMode(_) => "invalid_mode",
            Self::InvalidPassband(_) => "invalid_passband",
            Self::Overloaded(_) => "session_overloaded",
            Self::Encoder(_) => "encoder_error",
            Self::DxCluster(_) => "dx_cluster_error",
            Self::SessionNotFound(_) => "session_not_found",
            Self::UnknownExtension(_) => "unknown_extension",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Admission(_) => StatusCode::FORBIDDEN,
            Self::InvalidRequest(_) | Self::InvalidMode(_) | Self::InvalidPassband(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::SessionNotFound(_) | Self::UnknownExtension(_) => StatusCode::NOT_FOUND,
            Self::Overloaded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type WavegateResult<T> = Result<T, WavegateError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for WavegateError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for WavegateError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for WavegateError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_error_returns_forbidden() {
        let err = WavegateError::Admission("password".into());
        assert_eq!(err.code(), "admission_denied");
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn invalid_passband_returns_bad_request() {
        let err = WavegateError::InvalidPassband("low >= high".into());
        assert_eq!(err.code(), "invalid_passband");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn overload_returns_too_many_requests() {
        let err = WavegateError::Overloaded("drop threshold exceeded".into());
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }
}
