// error.rs - Error types for the attribute and profile store.
//
// `Unavailable` is the one condition callers must treat specially: it means
// the backing store could not be reached, and authorization falls back to
// fail-closed mode until it recovers.

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store cannot be reached. Retryable.
    #[error("storage unavailable: {reason}")]
    Unavailable { reason: String },

    /// Another writer changed the row since it was read.
    #[error("concurrent modification of {target}")]
    Conflict { target: String },

    /// The attribute name is empty or otherwise unusable.
    #[error("invalid attribute name '{name}': {reason}")]
    InvalidAttribute { name: String, reason: String },

    /// A document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row violates the data model (e.g. an attribute stored as `false`).
    #[error("corrupt row {target}: {reason}")]
    Corrupt { target: String, reason: String },

    /// Any other database failure.
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }

    /// Conditions that may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable { .. } | StoreError::Conflict { .. }
        )
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, _) = &err {
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::CannotOpen
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::FileLockingProtocolFailed
            ) {
                return StoreError::Unavailable {
                    reason: err.to_string(),
                };
            }
        }
        StoreError::Database(err.to_string())
    }
}
