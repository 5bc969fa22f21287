//! Health/Stats Monitor
//!
//! - `stats`: per-session counters and duration from the registry snapshot
//! - `health_check`: bounded ping of the backing store; reports `down`
//!   instead of failing
//!
//! The last health status is remembered so ingest can flag its results as
//! degraded without pinging the store on every call.

use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{TelemetryError, TelemetryResult};
use crate::session::SessionRegistry;
use crate::storage::{bounded, now_millis, SessionRecord, SessionState, TelemetryStore};
use crate::stream::Broadcaster;

/// Backing store liveness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    Down,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Up => write!(f, "up"),
            HealthStatus::Down => write!(f, "down"),
        }
    }
}

/// Health check result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub detail: String,
    /// Backend name (memory, sqlite)
    pub store: String,
    pub latency_ms: u64,
    /// Sessions currently cached by the registry
    pub sessions: usize,
    pub active_sessions: usize,
    pub subscribers: usize,
    pub checked_at: i64,
}

/// Per-session statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub session_id: String,
    pub state: SessionState,
    pub data_point_count: u64,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub last_timestamp: Option<i64>,
    /// `(end_time or now) - start_time`
    pub duration_ms: i64,
    pub late_arrivals: u64,
    pub subscribers: usize,
}

impl SessionStats {
    /// Derive stats from a record at wall-clock time `now`
    ///
    /// A session without points yet reports its open time as start.
    pub fn from_record(record: &SessionRecord, now: i64, subscribers: usize) -> Self {
        let start_time = record.start_time.unwrap_or(record.opened_at);
        let until = record.end_time.unwrap_or(now);

        Self {
            session_id: record.session_id.clone(),
            state: record.state(),
            data_point_count: record.data_point_count,
            start_time,
            end_time: record.end_time,
            last_timestamp: record.last_timestamp,
            duration_ms: until.saturating_sub(start_time).max(0),
            late_arrivals: record.late_arrivals,
            subscribers,
        }
    }
}

const STATUS_UNKNOWN: u8 = 0;
const STATUS_UP: u8 = 1;
const STATUS_DOWN: u8 = 2;

pub struct HealthMonitor {
    store: Arc<dyn TelemetryStore>,
    registry: Arc<SessionRegistry>,
    broadcaster: Arc<Broadcaster>,
    ping_timeout: Duration,
    last_status: AtomicU8,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        registry: Arc<SessionRegistry>,
        broadcaster: Arc<Broadcaster>,
        ping_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            broadcaster,
            ping_timeout,
            last_status: AtomicU8::new(STATUS_UNKNOWN),
        }
    }

    /// Statistics for one session
    pub async fn stats(&self, session_id: &str) -> TelemetryResult<SessionStats> {
        let record = self.registry.require(session_id).await?;
        Ok(SessionStats::from_record(
            &record,
            now_millis(),
            self.broadcaster.subscriber_count(session_id),
        ))
    }

    /// Ping the store within the configured timeout
    ///
    /// Never fails: an error or timeout yields `status: down`.
    pub async fn health_check(&self) -> HealthReport {
        let started = Instant::now();
        let ping = bounded("ping", self.ping_timeout, self.store.ping()).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (status, detail) = match ping {
            Ok(()) => (HealthStatus::Up, format!("{} store reachable", self.store.name())),
            Err(e) => (HealthStatus::Down, e.to_string()),
        };

        let previous = self.last_status.swap(
            match status {
                HealthStatus::Up => STATUS_UP,
                HealthStatus::Down => STATUS_DOWN,
            },
            Ordering::AcqRel,
        );
        match (previous, status) {
            (STATUS_DOWN, HealthStatus::Up) => {
                tracing::info!(store = self.store.name(), "Backing store recovered")
            }
            (p, HealthStatus::Down) if p != STATUS_DOWN => {
                tracing::warn!(store = self.store.name(), detail = %detail, "Backing store down")
            }
            _ => {}
        }

        let cached = self.registry.cached().await;
        let active_sessions = cached.iter().filter(|r| !r.is_closed()).count();

        HealthReport {
            status,
            detail,
            store: self.store.name().to_string(),
            latency_ms,
            sessions: cached.len(),
            active_sessions,
            subscribers: self.broadcaster.total_subscribers(),
            checked_at: now_millis(),
        }
    }

    /// True if the last health check reported `down`
    pub fn is_degraded(&self) -> bool {
        self.last_status.load(Ordering::Acquire) == STATUS_DOWN
    }

    /// Advisory check based on the last health status
    pub fn ensure_healthy(&self) -> TelemetryResult<()> {
        if self.is_degraded() {
            return Err(TelemetryError::Degraded(format!(
                "last {} store health check failed",
                self.store.name()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::stream::HubConfig;

    fn monitor() -> (HealthMonitor, Arc<SessionRegistry>) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(SessionRegistry::new(store.clone(), Duration::from_secs(1)));
        let broadcaster = Arc::new(Broadcaster::new(HubConfig::default()));
        let monitor = HealthMonitor::new(store, registry.clone(), broadcaster, Duration::from_millis(200));
        (monitor, registry)
    }

    #[test]
    fn test_stats_from_record() {
        let mut record = SessionRecord::new("S1", 500);
        let stats = SessionStats::from_record(&record, 800, 0);
        assert_eq!(stats.start_time, 500);
        assert_eq!(stats.duration_ms, 300);

        record.record_point(1000);
        record.record_point(2000);
        let stats = SessionStats::from_record(&record, 10_000, 2);
        assert_eq!(stats.data_point_count, 2);
        assert_eq!(stats.duration_ms, 9000);
        assert_eq!(stats.subscribers, 2);

        record.end_time = Some(4000);
        let stats = SessionStats::from_record(&record, 10_000, 0);
        assert_eq!(stats.state, SessionState::Closed);
        assert_eq!(stats.duration_ms, 3000);
    }

    #[tokio::test]
    async fn test_health_check_up_and_stable() {
        let (monitor, _registry) = monitor();
        assert!(!monitor.is_degraded());

        let first = monitor.health_check().await;
        let second = monitor.health_check().await;
        assert_eq!(first.status, HealthStatus::Up);
        assert_eq!(second.status, first.status);
        assert_eq!(first.store, "memory");
        assert!(monitor.ensure_healthy().is_ok());
    }

    #[tokio::test]
    async fn test_stats_unknown_session() {
        let (monitor, registry) = monitor();
        assert!(matches!(
            monitor.stats("S1").await,
            Err(TelemetryError::SessionNotFound(_))
        ));

        registry.open("S1").await.unwrap();
        let stats = monitor.stats("S1").await.unwrap();
        assert_eq!(stats.data_point_count, 0);
        assert_eq!(stats.state, SessionState::Active);
    }
}
