//! Aggregator
//!
//! - **bucket**: fixed-width (second/minute) buckets with avg/min/max per parameter
//! - **summary**: whole-session key figures per signal

pub mod bucket;
pub mod summary;

pub use bucket::{aggregate_points, AggregatedBucket, BucketWidth, ParameterStats, RunningStats};
pub use summary::{summarize, SessionSummary};
