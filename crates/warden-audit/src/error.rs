// error.rs - Error types for the audit export log.
//
// Querying and appending to the live trail goes through the storage
// backend and reports the backend's own error type; these variants cover
// the JSONL export file only.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while writing or verifying an audit export.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Failed to open or create the export file.
    #[error("failed to open audit export at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write a record to the export.
    #[error("failed to append audit record: {0}")]
    WriteFailed(#[from] std::io::Error),

    /// A line could not be serialized or parsed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The export has been altered; the hash chain is broken.
    #[error("integrity check failed at line {line}: expected hash {expected}, got {actual}")]
    IntegrityViolation {
        line: usize,
        expected: String,
        actual: String,
    },
}
