//! Error handling module
//!
//! Defines the canonical error shape returned to clients regardless of
//! which relay stage failed

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Relay pipeline error types
///
/// Every failure surfaced to a caller is one of these variants; upstream
/// native error schemas are mapped into `Upstream`, never leaked verbatim.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Request failed structural validation for its relay mode
    #[error("Request validation failed: {0}")]
    Validation(String),

    /// The principal's balance could not cover the reservation
    #[error("Insufficient quota for this request")]
    InsufficientQuota,

    /// No adaptor registered for the requested API type
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Request could not be translated to the backend-native shape
    #[error("Request conversion failed: {0}")]
    Conversion(String),

    /// Network-level failure reaching the backend
    #[error("Upstream transport failed: {0}")]
    Transport(String),

    /// Transport succeeded but the backend reported a logical failure
    #[error("Upstream error: {message}")]
    Upstream {
        code: String,
        message: String,
        status: StatusCode,
    },

    /// Upstream response could not be parsed into the expected shape
    #[error("Response materialization failed: {0}")]
    Materialization(String),

    /// Startup/configuration failure outside the per-request path
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Canonical error body: `{code, message}` plus the HTTP status on the wire
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

impl RelayError {
    /// Get HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::InsufficientQuota => StatusCode::PAYMENT_REQUIRED,
            RelayError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Conversion(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Transport(_) => StatusCode::BAD_GATEWAY,
            RelayError::Upstream { status, .. } => *status,
            RelayError::Materialization(_) => StatusCode::BAD_GATEWAY,
            RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get canonical error code string
    pub fn code(&self) -> &str {
        match self {
            RelayError::Validation(_) => "invalid_request",
            RelayError::InsufficientQuota => "insufficient_quota",
            RelayError::Configuration(_) => "invalid_api_type",
            RelayError::Conversion(_) => "convert_request_failed",
            RelayError::Transport(_) => "do_request_failed",
            RelayError::Upstream { code, .. } => code,
            RelayError::Materialization(_) => "bad_response_body",
            RelayError::Internal(_) => "internal_error",
        }
    }

    /// Whether this failure can only occur after the admission gate
    ///
    /// Validation and quota denial happen before any reservation exists;
    /// everything else fires after it and therefore rides the refund path.
    pub fn occurs_after_reservation(&self) -> bool {
        !matches!(
            self,
            RelayError::Validation(_) | RelayError::InsufficientQuota | RelayError::Internal(_)
        )
    }

    /// Convert to the canonical wire body
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
                error_type: "error".to_string(),
            },
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!("Relay error: {} - status: {}", self, status);
        } else {
            tracing::warn!("Relay error: {} - status: {}", self.code(), status);
        }

        (status, Json(self.to_body())).into_response()
    }
}

/// Result type alias
pub type RelayResult<T> = Result<T, RelayError>;

/// Error construction helpers
pub mod helpers {
    use super::*;

    pub fn validation_error(message: impl Into<String>) -> RelayError {
        RelayError::Validation(message.into())
    }

    pub fn conversion_error(message: impl Into<String>) -> RelayError {
        RelayError::Conversion(message.into())
    }

    pub fn transport_error(message: impl Into<String>) -> RelayError {
        RelayError::Transport(message.into())
    }

    pub fn materialization_error(message: impl Into<String>) -> RelayError {
        RelayError::Materialization(message.into())
    }

    /// Map an upstream error code to the canonical HTTP status
    pub fn upstream_status_for(code: &str) -> StatusCode {
        if code.contains("rate_limit") || code == "rate_limited" {
            StatusCode::TOO_MANY_REQUESTS
        } else if code.contains("quota") || code.contains("billing") {
            StatusCode::PAYMENT_REQUIRED
        } else if code.contains("auth") || code.contains("key") {
            StatusCode::UNAUTHORIZED
        } else if code.contains("not_found") {
            StatusCode::NOT_FOUND
        } else if code.contains("invalid") {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::BAD_GATEWAY
        }
    }
}
