//! Telemetry error taxonomy
//!
//! Every public engine operation returns [`TelemetryResult`]. Callers decide
//! on retries from [`ErrorKind::is_retryable`]; the engine itself never
//! retries a write.

use crate::storage::StorageError;
use serde::Serialize;
use thiserror::Error;

/// Coarse error classification surfaced to transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    SessionNotFound,
    StoreUnavailable,
    Degraded,
}

impl ErrorKind {
    /// Only store outages are worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::StoreUnavailable)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::InvalidInput => write!(f, "INVALID_INPUT"),
            ErrorKind::SessionNotFound => write!(f, "SESSION_NOT_FOUND"),
            ErrorKind::StoreUnavailable => write!(f, "STORE_UNAVAILABLE"),
            ErrorKind::Degraded => write!(f, "DEGRADED"),
        }
    }
}

/// Errors returned by the telemetry engine
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Malformed session id, bad point or unsupported bucket width
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Query against a session the engine has never seen
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Backing store unreachable or timed out
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Last health check failed; advisory only
    #[error("Degraded: {0}")]
    Degraded(String),
}

impl TelemetryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TelemetryError::InvalidInput(_) => ErrorKind::InvalidInput,
            TelemetryError::SessionNotFound(_) => ErrorKind::SessionNotFound,
            TelemetryError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            TelemetryError::Degraded(_) => ErrorKind::Degraded,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        TelemetryError::InvalidInput(message.into())
    }
}

impl From<StorageError> for TelemetryError {
    fn from(err: StorageError) -> Self {
        TelemetryError::StoreUnavailable(err.to_string())
    }
}

/// Result type for engine operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;
