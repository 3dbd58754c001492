//! Error types for the ARL engine
//!
//! One error hierarchy for the whole crate:
//! - `thiserror` for ergonomic error definitions
//! - Domain-specific variants for the mining pipeline (thresholds, records, rules)
//! - HTTP status code mapping for the query API
//!
//! An empty transaction table is deliberately *not* an error: every stage
//! returns an empty result for it.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::borrow::Cow;
use thiserror::Error;

/// Result type alias for ARL operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the ARL engine
#[derive(Debug, Error)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    #[error("Configuration error: {message}")]
    Config {
        message: Cow<'static, str>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Missing required environment variable: {var}")]
    MissingEnvVar { var: &'static str },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidConfig {
        key: &'static str,
        message: Cow<'static, str>,
    },

    // ========================================================================
    // Mining Errors
    // ========================================================================
    #[error("Invalid threshold {name}={value}: expected {expected}")]
    InvalidThreshold {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("Malformed record #{index}: {reason}")]
    MalformedRecord {
        index: usize,
        reason: Cow<'static, str>,
    },

    #[error("Degenerate rule {antecedent} => {consequent}: {message}")]
    DegenerateRule {
        antecedent: String,
        consequent: String,
        message: Cow<'static, str>,
    },

    #[error("Mining cancelled before stage '{stage}'")]
    Cancelled { stage: &'static str },

    // ========================================================================
    // I/O and Serialization Errors
    // ========================================================================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // API Errors
    // ========================================================================
    #[error("Bad request: {message}")]
    BadRequest { message: Cow<'static, str> },

    // ========================================================================
    // Generic Errors
    // ========================================================================
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    // ========================================================================
    // Constructors for common error patterns
    // ========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a malformed record error for the record at `index`
    pub fn malformed(index: usize, reason: impl Into<Cow<'static, str>>) -> Self {
        Self::MalformedRecord {
            index,
            reason: reason.into(),
        }
    }

    /// Create a bad request error
    pub fn bad_request(message: impl Into<Cow<'static, str>>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    // ========================================================================
    // Error Classification
    // ========================================================================

    /// Returns true if this error concerns a single input record and may be
    /// skipped under a lenient policy
    pub fn is_record_level(&self) -> bool {
        matches!(self, Error::MalformedRecord { .. })
    }

    /// Returns true if this error was raised before any mining work began
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config { .. }
                | Error::MissingEnvVar { .. }
                | Error::InvalidConfig { .. }
                | Error::InvalidThreshold { .. }
        )
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. }
            | Error::InvalidThreshold { .. }
            | Error::MalformedRecord { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } | Error::MissingEnvVar { .. } | Error::InvalidConfig { .. } => {
                "CONFIG_ERROR"
            }
            Error::InvalidThreshold { .. } => "INVALID_THRESHOLD",
            Error::MalformedRecord { .. } => "MALFORMED_RECORD",
            Error::DegenerateRule { .. } => "DEGENERATE_RULE",
            Error::Cancelled { .. } => "CANCELLED",
            Error::Io(_) => "IO_ERROR",
            Error::Csv(_) | Error::Json(_) => "SERIALIZATION_ERROR",
            Error::BadRequest { .. } => "BAD_REQUEST",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }
}

// ============================================================================
// Error Response for API
// ============================================================================

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        // Don't expose internal error details
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error: ErrorBody { code, message },
        };

        (status, Json(body)).into_response()
    }
}
