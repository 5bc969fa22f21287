//! Fixed-width time buckets
//!
//! Buckets are computed on demand by streaming over raw points; nothing
//! here is persisted. Only the `max_buckets` most recent buckets are kept
//! while streaming, so memory stays bounded regardless of session length
//! or point order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::TelemetryError;
use crate::storage::DataPoint;

/// Supported bucket widths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketWidth {
    Second,
    Minute,
}

impl BucketWidth {
    /// Width in milliseconds
    pub fn millis(&self) -> i64 {
        match self {
            BucketWidth::Second => 1_000,
            BucketWidth::Minute => 60_000,
        }
    }

    /// Floor a timestamp to the start of its bucket
    ///
    /// Uses euclidean division so pre-epoch timestamps floor downwards too.
    pub fn truncate(&self, timestamp: i64) -> i64 {
        let width = self.millis();
        timestamp.div_euclid(width) * width
    }
}

impl FromStr for BucketWidth {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "second" => Ok(BucketWidth::Second),
            "minute" => Ok(BucketWidth::Minute),
            other => Err(TelemetryError::invalid(format!(
                "unsupported bucket width '{}' (expected 'second' or 'minute')",
                other
            ))),
        }
    }
}

impl std::fmt::Display for BucketWidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BucketWidth::Second => write!(f, "second"),
            BucketWidth::Minute => write!(f, "minute"),
        }
    }
}

/// Summary statistics of one parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub count: u64,
}

/// Single-pass accumulator behind [`ParameterStats`]
#[derive(Debug, Clone, Copy)]
pub struct RunningStats {
    sum: f64,
    min: f64,
    max: f64,
    count: u64,
}

impl Default for RunningStats {
    fn default() -> Self {
        Self {
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            count: 0,
        }
    }
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.count += 1;
    }

    /// `None` until at least one value was pushed
    pub fn finish(&self) -> Option<ParameterStats> {
        if self.count == 0 {
            return None;
        }
        Some(ParameterStats {
            avg: self.sum / self.count as f64,
            min: self.min,
            max: self.max,
            count: self.count,
        })
    }
}

/// Summary of all points that fell into one bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedBucket {
    /// Timestamp floored to the bucket width
    pub bucket_start: i64,
    /// Points in the bucket
    pub count: u64,
    /// Only parameters present in at least one point of the bucket
    pub parameters: BTreeMap<String, ParameterStats>,
}

#[derive(Default)]
struct BucketAccumulator {
    count: u64,
    parameters: BTreeMap<String, RunningStats>,
}

impl BucketAccumulator {
    fn push(&mut self, point: &DataPoint) {
        self.count += 1;
        for (name, value) in &point.parameters {
            if value.is_finite() {
                self.parameters.entry(name.clone()).or_default().push(*value);
            }
        }
    }

    fn finish(self, bucket_start: i64) -> AggregatedBucket {
        AggregatedBucket {
            bucket_start,
            count: self.count,
            parameters: self
                .parameters
                .into_iter()
                .filter_map(|(name, stats)| stats.finish().map(|s| (name, s)))
                .collect(),
        }
    }
}

/// Bucket `points` and return the `max_buckets` most recent non-empty
/// buckets, newest first
pub fn aggregate_points<'a, I>(points: I, width: BucketWidth, max_buckets: usize) -> Vec<AggregatedBucket>
where
    I: IntoIterator<Item = &'a DataPoint>,
{
    if max_buckets == 0 {
        return Vec::new();
    }

    let mut buckets: BTreeMap<i64, BucketAccumulator> = BTreeMap::new();

    for point in points {
        let start = width.truncate(point.timestamp);
        buckets.entry(start).or_default().push(point);

        // Anything older than the newest `max_buckets` can never be returned
        if buckets.len() > max_buckets {
            buckets.pop_first();
        }
    }

    buckets
        .into_iter()
        .rev()
        .map(|(start, acc)| acc.finish(start))
        .collect()
}
