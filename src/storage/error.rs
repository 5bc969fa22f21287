//! Storage layer error types
//!
//! Defines all errors a backing store can raise. The engine maps every one
//! of them to `TelemetryError::StoreUnavailable`.

use thiserror::Error;

/// Errors that can occur in a backing store
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite call failed
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Serialization/deserialization of stored parameters failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A store call did not complete within its bound
    #[error("Store operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// The store cannot be reached at all
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Lock acquisition failed (poisoned mutex)
    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::Unavailable(format!("store task failed: {}", err))
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
