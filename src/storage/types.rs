//! Core data types for the telemetry store
//!
//! - `DataPoint`: one accepted sensor snapshot for a session
//! - `PointInput`: the raw, not yet validated payload a producer sends
//! - `TimeRange`: a half-open time interval for queries
//! - `SessionRecord`: summary counters kept per session

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Current wall-clock time in Unix milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A single accepted sensor reading snapshot
///
/// `sequence` is assigned by the store on append and breaks ties between
/// points sharing a timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    /// Session this point belongs to
    pub session_id: String,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    /// Insertion sequence within the session
    #[serde(default)]
    pub sequence: u64,
    /// Parameter name to numeric value (rpm, speed, engineTemp, ...)
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
}

impl DataPoint {
    /// Create an empty data point
    pub fn new(session_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp,
            sequence: 0,
            parameters: BTreeMap::new(),
        }
    }

    /// Builder method: add a parameter reading
    pub fn param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    /// Get a parameter value
    pub fn get(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).copied()
    }

    /// Ordering key inside a session
    pub fn key(&self) -> (i64, u64) {
        (self.timestamp, self.sequence)
    }
}

/// Raw payload as received from a producer
///
/// Parameters are kept as JSON values until the ingestion pipeline has
/// filtered out everything that is not a finite number.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PointInput {
    /// Producer timestamp in milliseconds; assigned on ingest when absent
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Unvalidated parameter map
    #[serde(default)]
    pub parameters: serde_json::Map<String, Value>,
}

impl PointInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the producer timestamp
    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Builder: add a numeric reading
    pub fn param(mut self, name: impl Into<String>, value: f64) -> Self {
        let value = serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null);
        self.parameters.insert(name.into(), value);
        self
    }

    /// Builder: add an arbitrary JSON value
    pub fn raw(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }
}

/// Time range for queries (half-open interval: [start, end))
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Start timestamp (inclusive), in milliseconds
    pub start: i64,
    /// End timestamp (exclusive), in milliseconds
    pub end: i64,
}

impl TimeRange {
    /// Create a time range, returning None if invalid
    pub fn try_new(start: i64, end: i64) -> Option<Self> {
        if start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// The whole timeline
    pub fn all() -> Self {
        Self {
            start: i64::MIN,
            end: i64::MAX,
        }
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Active => write!(f, "active"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Per-session summary counters
///
/// This is a cache over the store contents: everything except `opened_at`,
/// `end_time` and `late_arrivals` can be rebuilt from a [`SessionScan`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    /// Wall-clock time the record was created
    pub opened_at: i64,
    /// Earliest point timestamp seen
    pub start_time: Option<i64>,
    /// Latest point timestamp seen
    pub last_timestamp: Option<i64>,
    /// Set once the session is explicitly closed
    pub end_time: Option<i64>,
    pub data_point_count: u64,
    #[serde(default)]
    pub late_arrivals: u64,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>, opened_at: i64) -> Self {
        Self {
            session_id: session_id.into(),
            opened_at,
            start_time: None,
            last_timestamp: None,
            end_time: None,
            data_point_count: 0,
            late_arrivals: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.end_time.is_some() {
            SessionState::Closed
        } else {
            SessionState::Active
        }
    }

    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }

    /// Account for one accepted point; returns true for a late arrival
    pub fn record_point(&mut self, timestamp: i64) -> bool {
        self.data_point_count += 1;
        self.start_time = Some(self.start_time.map_or(timestamp, |s| s.min(timestamp)));
        self.last_timestamp = Some(self.last_timestamp.map_or(timestamp, |l| l.max(timestamp)));

        let late = self.is_closed();
        if late {
            self.late_arrivals += 1;
        }
        late
    }

    /// Overwrite point-derived counters with the result of a store scan
    pub fn apply_scan(&mut self, scan: &SessionScan) {
        self.data_point_count = scan.count;
        self.start_time = scan.first_timestamp;
        self.last_timestamp = scan.last_timestamp;
    }
}

/// Point-derived facts about a session, computed by scanning the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionScan {
    pub count: u64,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
}
