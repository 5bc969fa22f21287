//! Backing store abstraction
//!
//! A backing store offers one ordered, time-indexed collection of points per
//! session plus one metadata record per session. Implementations:
//!
//! - [`MemoryStore`](crate::storage::MemoryStore): process-local ordered maps
//! - [`SqliteStore`](crate::storage::SqliteStore): durable SQLite tables
//!
//! Every call the engine makes goes through [`bounded`], so a hung store
//! surfaces as [`StorageError::Timeout`] instead of blocking the caller.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{DataPoint, SessionRecord, SessionScan, TimeRange};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Ordered time-indexed collection + session metadata
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Short backend name for logs and health details
    fn name(&self) -> &'static str;

    /// Append a point, assigning its insertion sequence.
    ///
    /// Returns the point as stored. Duplicate timestamps are all retained.
    async fn append(&self, point: DataPoint) -> StorageResult<DataPoint>;

    /// Points with `range.start <= timestamp < range.end`, ascending by
    /// `(timestamp, sequence)`, at most `limit` of them
    async fn range(
        &self,
        session_id: &str,
        range: TimeRange,
        limit: usize,
    ) -> StorageResult<Vec<DataPoint>>;

    /// The `count` newest points after skipping the `offset` newest,
    /// returned in ascending order
    async fn recent(
        &self,
        session_id: &str,
        offset: usize,
        count: usize,
    ) -> StorageResult<Vec<DataPoint>>;

    /// Count and time bounds of a session's stored points
    async fn scan(&self, session_id: &str) -> StorageResult<SessionScan>;

    /// Insert or replace a session record
    async fn put_session(&self, record: &SessionRecord) -> StorageResult<()>;

    /// Load a session record
    async fn get_session(&self, session_id: &str) -> StorageResult<Option<SessionRecord>>;

    /// Every session id known to the store (records or points), sorted
    async fn session_ids(&self) -> StorageResult<Vec<String>>;

    /// Remove a session's points and record; returns removed point count
    async fn delete_session(&self, session_id: &str) -> StorageResult<u64>;

    /// Lightweight liveness round-trip
    async fn ping(&self) -> StorageResult<()>;
}

/// Run a store call with an upper bound on its duration
pub async fn bounded<T, F>(operation: &'static str, timeout: Duration, fut: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout {
            operation,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
