//! Unified error type for all Relay crates.

use std::fmt::Debug;
use thiserror::Error;

/// Unified error type for Relay.
///
/// Component crates keep their own narrower error enums and convert into
/// this one at the service boundary.
#[derive(Error, Debug)]
pub enum RelayError {
    // ============ Rendering Errors ============
    /// A template was rendered without one or more required fields.
    #[error("Missing template variables for {template}: {}", fields.join(", "))]
    MissingVariable {
        template: String,
        fields: Vec<String>,
    },

    /// Template identifier is not part of the catalog.
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    // ============ Delivery Errors ============
    /// Send rate ceiling reached; the job is deferred, not failed.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// The transport could not deliver the message.
    #[error("Transport failure ({transport}): {message}")]
    TransportFailure { transport: String, message: String },

    /// Operation timed out.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ============ Domain Errors ============
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource not found
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    /// A job was not in the state an operation required.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    // ============ Infrastructure Errors ============
    /// Configuration error (includes an uninitialized transport)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Queue storage error
    #[error("Storage error: {0}")]
    Storage(String),

    // ============ Internal Errors ============
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RelayError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::MissingVariable { .. } => "MISSING_VARIABLE",
            Self::UnknownTemplate(_) => "UNKNOWN_TEMPLATE",
            Self::RateLimited => "RATE_LIMITED",
            Self::TransportFailure { .. } => "TRANSPORT_FAILURE",
            Self::Timeout(_) => "TIMEOUT",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a not found error for a resource.
    #[must_use]
    pub fn not_found<T: ToString>(resource_type: &'static str, id: T) -> Self {
        Self::NotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// Checks if this error is transient and worth retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::TransportFailure { .. } | Self::Timeout(_) | Self::Storage(_)
        )
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON serialization error: {}", err))
    }
}
