//! Time-Series Store
//!
//! Append-only, time-ordered storage per diagnostic session:
//!
//! - **types**: Core data structures (DataPoint, PointInput, TimeRange, SessionRecord)
//! - **store**: The `TelemetryStore` trait every backing store implements
//! - **memory**: Ordered in-process store
//! - **sqlite**: Durable SQLite store
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   DataPoint → append → (session_id, timestamp, sequence) ordered collection
//!
//! Read Path:
//!   range / recent → ordered scan → ascending Vec<DataPoint>
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use diagstream::storage::{DataPoint, MemoryStore, TelemetryStore, TimeRange};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryStore::new();
//!     store.append(DataPoint::new("S1", 1000).param("rpm", 800.0)).await?;
//!
//!     let points = store.range("S1", TimeRange { start: 500, end: 1500 }, 10).await?;
//!     assert_eq!(points.len(), 1);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{bounded, TelemetryStore};
pub use types::{now_millis, DataPoint, PointInput, SessionRecord, SessionScan, SessionState, TimeRange};
