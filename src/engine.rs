//! Telemetry Engine
//!
//! One facade over every component, exposing the operation set that
//! transports (HTTP handlers, streaming sockets, the CLI) consume:
//!
//! ```text
//! producers ──ingest──► IngestPipeline ──append──► TelemetryStore
//!                            │  └──counters──► SessionRegistry
//!                            └──publish──► Broadcaster ──► subscribers
//!
//! readers ──range_query / recent / aggregate / summary──► TelemetryStore
//!         ──stats / health_check──► HealthMonitor
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::aggregate::{aggregate_points, summarize, AggregatedBucket, BucketWidth, SessionSummary};
use crate::config::{Config, StoreBackend};
use crate::error::{TelemetryError, TelemetryResult};
use crate::health::{HealthMonitor, HealthReport, SessionStats};
use crate::ingest::{validate_session_id, Accepted, BatchOutcome, IngestPipeline};
use crate::session::SessionRegistry;
use crate::storage::{
    bounded, now_millis, DataPoint, MemoryStore, PointInput, SessionRecord, SqliteStore,
    TelemetryStore, TimeRange,
};
use crate::stream::{Broadcaster, HubConfig, SubscriptionHandle};

/// Runtime knobs of the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on every backing-store call
    pub store_timeout: Duration,
    /// Bound on the health check ping
    pub health_timeout: Duration,
    pub subscriber_buffer: usize,
    /// Closed sessions older than this are reported by `expired_sessions`
    pub session_ttl: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_millis(2000),
            health_timeout: Duration::from_millis(500),
            subscriber_buffer: 256,
            session_ttl: None,
        }
    }
}

impl From<&Config> for EngineConfig {
    fn from(config: &Config) -> Self {
        Self {
            store_timeout: config.store.timeout(),
            health_timeout: Duration::from_millis(config.health.timeout_ms),
            subscriber_buffer: config.stream.subscriber_buffer,
            session_ttl: config.retention.session_ttl_secs.map(Duration::from_secs),
        }
    }
}

/// Real-time diagnostic telemetry engine
pub struct TelemetryEngine {
    store: Arc<dyn TelemetryStore>,
    registry: Arc<SessionRegistry>,
    broadcaster: Arc<Broadcaster>,
    pipeline: IngestPipeline,
    monitor: HealthMonitor,
    config: EngineConfig,
}

impl TelemetryEngine {
    /// Wire the engine around an existing backing store
    pub fn new(store: Arc<dyn TelemetryStore>, config: EngineConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new(store.clone(), config.store_timeout));
        let broadcaster = Arc::new(Broadcaster::new(HubConfig {
            subscriber_buffer: config.subscriber_buffer,
        }));
        let pipeline = IngestPipeline::new(
            store.clone(),
            registry.clone(),
            broadcaster.clone(),
            config.store_timeout,
        );
        let monitor = HealthMonitor::new(
            store.clone(),
            registry.clone(),
            broadcaster.clone(),
            config.health_timeout,
        );

        Self {
            store,
            registry,
            broadcaster,
            pipeline,
            monitor,
            config,
        }
    }

    /// Engine over a fresh process-local store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), EngineConfig::default())
    }

    /// Build the store selected by `config.store.backend` and wire the engine
    pub fn from_config(config: &Config) -> TelemetryResult<Self> {
        config
            .validate()
            .map_err(|e| TelemetryError::invalid(e.to_string()))?;

        let store: Arc<dyn TelemetryStore> = match config.store.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Sqlite => Arc::new(SqliteStore::open(&config.store.data_path())?),
        };

        tracing::info!(
            backend = %config.store.backend,
            timeout_ms = config.store.timeout_ms,
            "Telemetry engine ready"
        );
        Ok(Self::new(store, EngineConfig::from(config)))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    // ===== Ingestion =====

    /// Accept one point for `session_id`
    ///
    /// `degraded` is set when the last health check failed; the write is
    /// attempted regardless.
    pub async fn ingest(&self, session_id: &str, point: PointInput) -> TelemetryResult<Accepted> {
        let mut accepted = self.pipeline.ingest(session_id, point).await?;
        accepted.degraded = self.monitor.is_degraded();
        if accepted.degraded {
            tracing::warn!(session_id = %session_id, "Ingest accepted while store degraded");
        }
        Ok(accepted)
    }

    /// Accept points in order; failures are reported per index
    pub async fn ingest_batch(
        &self,
        session_id: &str,
        points: Vec<PointInput>,
    ) -> TelemetryResult<BatchOutcome> {
        let mut outcome = self.pipeline.ingest_batch(session_id, points).await?;
        let degraded = self.monitor.is_degraded();
        for accepted in &mut outcome.accepted {
            accepted.degraded = degraded;
        }
        Ok(outcome)
    }

    // ===== Session lifecycle =====

    /// Explicit `Unknown → Active`; idempotent for known sessions
    pub async fn open_session(&self, session_id: &str) -> TelemetryResult<SessionRecord> {
        validate_session_id(session_id)?;
        self.registry.open(session_id).await
    }

    /// Close a session now
    pub async fn close_session(&self, session_id: &str) -> TelemetryResult<SessionRecord> {
        self.close_session_at(session_id, now_millis()).await
    }

    /// Close a session with an explicit end time
    pub async fn close_session_at(
        &self,
        session_id: &str,
        end_time: i64,
    ) -> TelemetryResult<SessionRecord> {
        validate_session_id(session_id)?;
        self.registry.close(session_id, end_time).await
    }

    /// Every known session id, sorted
    pub async fn list_sessions(&self) -> TelemetryResult<Vec<String>> {
        self.registry.list().await
    }

    /// Recompute session counters from the stored points
    pub async fn rebuild_registry(&self) -> TelemetryResult<usize> {
        self.registry.rebuild().await
    }

    // ===== Queries =====

    /// Points with `start <= timestamp < end`, ascending, at most `limit`
    pub async fn range_query(
        &self,
        session_id: &str,
        start: i64,
        end: i64,
        limit: usize,
    ) -> TelemetryResult<Vec<DataPoint>> {
        if start > end {
            return Err(TelemetryError::invalid(format!(
                "range start {} is after end {}",
                start, end
            )));
        }
        self.registry.require(session_id).await?;

        let Some(range) = TimeRange::try_new(start, end) else {
            return Ok(Vec::new());
        };
        let points = bounded(
            "range",
            self.config.store_timeout,
            self.store.range(session_id, range, limit),
        )
        .await?;
        Ok(points)
    }

    /// The `count` newest points after skipping `offset`, ascending
    pub async fn recent(
        &self,
        session_id: &str,
        offset: usize,
        count: usize,
    ) -> TelemetryResult<Vec<DataPoint>> {
        self.registry.require(session_id).await?;
        let points = bounded(
            "recent",
            self.config.store_timeout,
            self.store.recent(session_id, offset, count),
        )
        .await?;
        Ok(points)
    }

    /// Fixed-width buckets, newest first, at most `max_buckets`
    ///
    /// `bucket_width` must be `second` or `minute`.
    pub async fn aggregate(
        &self,
        session_id: &str,
        bucket_width: &str,
        max_buckets: usize,
    ) -> TelemetryResult<Vec<AggregatedBucket>> {
        let width: BucketWidth = bucket_width.parse()?;
        if max_buckets == 0 {
            return Err(TelemetryError::invalid("max_buckets must be at least 1"));
        }

        let points = self.session_points(session_id).await?;
        let buckets = aggregate_points(&points, width, max_buckets);

        tracing::debug!(
            session_id = %session_id,
            width = %width,
            points = points.len(),
            buckets = buckets.len(),
            "Aggregated session"
        );
        Ok(buckets)
    }

    /// Whole-session per-signal key figures
    pub async fn summary(&self, session_id: &str) -> TelemetryResult<SessionSummary> {
        let points = self.session_points(session_id).await?;
        Ok(summarize(session_id, &points))
    }

    /// One snapshot read of every point of a known session
    async fn session_points(&self, session_id: &str) -> TelemetryResult<Vec<DataPoint>> {
        self.registry.require(session_id).await?;
        let points = bounded(
            "range",
            self.config.store_timeout,
            self.store.range(session_id, TimeRange::all(), usize::MAX),
        )
        .await?;
        Ok(points)
    }

    // ===== Live delivery =====

    /// Deliver every point accepted for `session_id` from now on
    ///
    /// The session does not need to exist yet. `on_point` runs on the
    /// subscription's own delivery thread and may block without affecting
    /// ingestion or other subscribers.
    pub fn subscribe<F>(&self, session_id: &str, on_point: F) -> TelemetryResult<SubscriptionHandle>
    where
        F: Fn(&DataPoint) + Send + Sync + 'static,
    {
        validate_session_id(session_id)?;
        self.broadcaster
            .subscribe(session_id, on_point)
            .map_err(|e| TelemetryError::Degraded(format!("cannot start subscriber delivery: {}", e)))
    }

    /// Stop delivery; returns false if the handle was already cancelled
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.broadcaster.unsubscribe(handle)
    }

    /// Points dropped for a slow subscriber so far
    pub fn dropped_points(&self, handle: &SubscriptionHandle) -> Option<u64> {
        self.broadcaster.dropped(handle)
    }

    // ===== Monitoring =====

    pub async fn stats(&self, session_id: &str) -> TelemetryResult<SessionStats> {
        self.monitor.stats(session_id).await
    }

    pub async fn health_check(&self) -> HealthReport {
        self.monitor.health_check().await
    }

    /// `Degraded` if the last health check reported `down`
    pub fn ensure_healthy(&self) -> TelemetryResult<()> {
        self.monitor.ensure_healthy()
    }

    // ===== Retention tooling =====

    /// Closed sessions whose `end_time + ttl` is at or before `now`
    ///
    /// Empty when no TTL is configured.
    pub async fn expired_sessions(&self, now: i64) -> TelemetryResult<Vec<String>> {
        let Some(ttl) = self.config.session_ttl else {
            return Ok(Vec::new());
        };
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        let mut expired = Vec::new();
        for session_id in self.registry.list().await? {
            if let Some(record) = self.registry.snapshot(&session_id).await? {
                if let Some(end) = record.end_time {
                    if end.saturating_add(ttl_ms) <= now {
                        expired.push(session_id);
                    }
                }
            }
        }
        Ok(expired)
    }

    /// Delete a session's points and record; returns removed point count
    ///
    /// Holds the session writer across the delete, so an ingest already in
    /// flight lands first and one arriving later starts a new session.
    pub async fn purge_session(&self, session_id: &str) -> TelemetryResult<u64> {
        let writer = self
            .registry
            .writer(session_id, false)
            .await?
            .ok_or_else(|| TelemetryError::SessionNotFound(session_id.to_string()))?;

        let removed = bounded(
            "delete_session",
            self.config.store_timeout,
            self.store.delete_session(session_id),
        )
        .await?;
        self.registry.retire(writer).await;

        tracing::info!(session_id = %session_id, points = removed, "Purged session");
        Ok(removed)
    }
}
