//! # diagstream
//!
//! Real-time diagnostic telemetry engine: accepts a continuous stream of
//! vehicle sensor readings per diagnostic session, stores them for time-range
//! and bucketed queries, and fans them out to live subscribers.
//!
//! ## Features
//!
//! - **Ordered storage**: per-session points keyed by `(timestamp, sequence)`,
//!   in memory or in SQLite
//! - **Aggregation**: second/minute buckets with avg/min/max per parameter
//! - **Live delivery**: per-session fan-out that drops the oldest point for a
//!   slow subscriber instead of stalling ingestion
//! - **Bounded store calls**: a hung backing store surfaces as
//!   `StoreUnavailable`, and health checks report `down` within their timeout
//!
//! ## Modules
//!
//! - [`storage`]: Time-series store trait and backends
//! - [`session`]: Session registry (per-session serialized counters)
//! - [`ingest`]: Validation and the ingest write path
//! - [`aggregate`]: Bucket aggregation and session summaries
//! - [`stream`]: Pub/sub broadcaster
//! - [`health`]: Session stats and store liveness
//! - [`engine`]: Facade wiring everything together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use diagstream::{PointInput, TelemetryEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = TelemetryEngine::in_memory();
//!
//!     let _live = engine.subscribe("S1", |point| {
//!         println!("{} rpm={:?}", point.timestamp, point.get("rpm"));
//!     })?;
//!
//!     engine.ingest("S1", PointInput::new().at(1000).param("rpm", 800.0)).await?;
//!     engine.ingest("S1", PointInput::new().at(2000).param("rpm", 1200.0)).await?;
//!
//!     let buckets = engine.aggregate("S1", "minute", 1).await?;
//!     println!("rpm avg: {}", buckets[0].parameters["rpm"].avg);
//!
//!     let stats = engine.stats("S1").await?;
//!     println!("{} points", stats.data_point_count);
//!
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod ingest;
pub mod session;
pub mod storage;
pub mod stream;

// Re-export top-level types for convenience
pub use storage::{
    DataPoint, MemoryStore, PointInput, SessionRecord, SessionState, SqliteStore, StorageError,
    StorageResult, TelemetryStore, TimeRange,
};

pub use aggregate::{AggregatedBucket, BucketWidth, ParameterStats, SessionSummary};

pub use config::{Config, ConfigError, StoreBackend};

pub use engine::{EngineConfig, TelemetryEngine};

pub use error::{ErrorKind, TelemetryError, TelemetryResult};

pub use health::{HealthReport, HealthStatus, SessionStats};

pub use ingest::{Accepted, BatchError, BatchOutcome};

pub use stream::{StreamMessage, SubscriptionHandle};
