//! Queue store error types.

use crate::job::JobStatus;
use relay_core::{JobId, RelayError};
use thiserror::Error;

/// Result type for queue store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Queue store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Job not found.
    #[error("Email job not found: {0}")]
    NotFound(JobId),

    /// The job was not in the state the transition starts from.
    #[error("Invalid transition for job {id}: expected {expected}, got {actual}")]
    InvalidTransition {
        id: JobId,
        expected: JobStatus,
        actual: JobStatus,
    },

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be mapped back into a job.
    #[error("Corrupt job row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Returns true if the operation may succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => RelayError::not_found("EmailJob", id),
            StoreError::InvalidTransition {
                expected, actual, ..
            } => RelayError::InvalidState {
                expected: expected.to_string(),
                actual: actual.to_string(),
            },
            other => RelayError::Storage(other.to_string()),
        }
    }
}
