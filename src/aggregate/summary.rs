//! Whole-session summary
//!
//! Per-signal key figures over an entire session, the same numbers a
//! diagnostic analysis pack starts from: which signals were seen, over what
//! time span, and their mean/min/max.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::aggregate::bucket::{ParameterStats, RunningStats};
use crate::storage::DataPoint;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub rows: u64,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub duration_ms: i64,
    /// Every parameter name seen, sorted
    pub signals: Vec<String>,
    pub parameters: BTreeMap<String, ParameterStats>,
}

/// Summarize a session from its points (any order)
pub fn summarize<'a, I>(session_id: &str, points: I) -> SessionSummary
where
    I: IntoIterator<Item = &'a DataPoint>,
{
    let mut rows = 0u64;
    let mut start: Option<i64> = None;
    let mut end: Option<i64> = None;
    let mut stats: BTreeMap<String, RunningStats> = BTreeMap::new();

    for point in points {
        rows += 1;
        start = Some(start.map_or(point.timestamp, |s| s.min(point.timestamp)));
        end = Some(end.map_or(point.timestamp, |e| e.max(point.timestamp)));

        for (name, value) in &point.parameters {
            if value.is_finite() {
                stats.entry(name.clone()).or_default().push(*value);
            }
        }
    }

    let parameters: BTreeMap<String, ParameterStats> = stats
        .into_iter()
        .filter_map(|(name, s)| s.finish().map(|s| (name, s)))
        .collect();

    SessionSummary {
        session_id: session_id.to_string(),
        rows,
        start,
        end,
        duration_ms: match (start, end) {
            (Some(s), Some(e)) => e - s,
            _ => 0,
        },
        signals: parameters.keys().cloned().collect(),
        parameters,
    }
}
