//! Ingestion Pipeline
//!
//! Validates a producer payload and applies its three effects in order:
//!
//! 1. append to the store
//! 2. bump the session counters (creating the session if needed)
//! 3. publish to live subscribers
//!
//! All three happen while holding the session's writer, so per-session
//! counters stay monotonic and subscribers see points in acceptance order.
//! Effects are not rolled back: a failure after the append is reported to
//! the caller but the point stays stored (at-least-once).

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ErrorKind, TelemetryError, TelemetryResult};
use crate::session::SessionRegistry;
use crate::storage::{bounded, now_millis, DataPoint, PointInput, TelemetryStore};
use crate::stream::Broadcaster;

/// Longest accepted session id
pub const MAX_SESSION_ID_LEN: usize = 128;
/// Longest accepted parameter name
pub const MAX_PARAMETER_NAME_LEN: usize = 64;
/// Largest accepted batch
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Result of a successful ingest
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    pub session_id: String,
    /// Producer timestamp, or the ingest time if the producer sent none
    pub timestamp: i64,
    pub sequence: u64,
    /// Point arrived after the session was closed
    pub late_arrival: bool,
    /// Parameter names dropped because their values were not numeric
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dropped_parameters: Vec<String>,
    /// Last health check failed (advisory)
    pub degraded: bool,
}

/// Per-point failure inside a batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchError {
    pub index: usize,
    pub kind: ErrorKind,
    pub error: String,
}

/// Outcome of a batch ingest; nothing is rolled back on partial failure
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub accepted: Vec<Accepted>,
    pub errors: Vec<BatchError>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate an externally minted session id
pub fn validate_session_id(session_id: &str) -> TelemetryResult<()> {
    if session_id.trim().is_empty() {
        return Err(TelemetryError::invalid("Session id cannot be empty"));
    }

    if session_id.len() > MAX_SESSION_ID_LEN {
        return Err(TelemetryError::invalid(format!(
            "Session id exceeds maximum length of {} characters",
            MAX_SESSION_ID_LEN
        )));
    }

    if session_id.chars().any(char::is_control) {
        return Err(TelemetryError::invalid(
            "Session id contains control characters",
        ));
    }

    Ok(())
}

/// Keep finite numbers (and numeric strings); report every other key
pub fn sanitize_parameters(
    raw: &serde_json::Map<String, Value>,
) -> (BTreeMap<String, f64>, Vec<String>) {
    let mut parameters = BTreeMap::new();
    let mut dropped = Vec::new();

    for (name, value) in raw {
        let numeric = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };

        match numeric {
            Some(v) if v.is_finite() && !name.is_empty() && name.len() <= MAX_PARAMETER_NAME_LEN => {
                parameters.insert(name.clone(), v);
            }
            _ => dropped.push(name.clone()),
        }
    }

    (parameters, dropped)
}

/// Validates and writes incoming points
pub struct IngestPipeline {
    store: Arc<dyn TelemetryStore>,
    registry: Arc<SessionRegistry>,
    broadcaster: Arc<Broadcaster>,
    store_timeout: Duration,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        registry: Arc<SessionRegistry>,
        broadcaster: Arc<Broadcaster>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            broadcaster,
            store_timeout,
        }
    }

    /// Validate and build the point to store
    fn prepare(&self, session_id: &str, input: &PointInput) -> TelemetryResult<(DataPoint, Vec<String>)> {
        validate_session_id(session_id)?;

        let timestamp = match input.timestamp {
            Some(ts) if ts < 0 => {
                return Err(TelemetryError::invalid("Timestamp cannot be negative"));
            }
            Some(ts) => ts,
            None => now_millis(),
        };

        let (parameters, dropped) = sanitize_parameters(&input.parameters);
        if !dropped.is_empty() {
            tracing::warn!(
                session_id = %session_id,
                dropped = ?dropped,
                "Dropped non-numeric parameters"
            );
        }

        let point = DataPoint {
            session_id: session_id.to_string(),
            timestamp,
            sequence: 0,
            parameters,
        };
        Ok((point, dropped))
    }

    /// Ingest a single point
    pub async fn ingest(&self, session_id: &str, input: PointInput) -> TelemetryResult<Accepted> {
        let (point, dropped_parameters) = self.prepare(session_id, &input)?;

        let mut writer = self
            .registry
            .writer(session_id, true)
            .await?
            .ok_or_else(|| TelemetryError::SessionNotFound(session_id.to_string()))?;

        // 1. store; nothing has been applied yet if this fails
        let stored = bounded("append", self.store_timeout, self.store.append(point)).await?;

        // 2. counters
        let late_arrival = writer.record_mut().record_point(stored.timestamp);
        writer.commit();
        if late_arrival {
            tracing::warn!(
                session_id = %session_id,
                timestamp = stored.timestamp,
                "Late arrival after session close"
            );
        }
        let persisted = self.registry.persist(&writer).await;

        // 3. subscribers; publish is non-blocking and cannot fail
        self.broadcaster.publish(&stored);
        drop(writer);

        if let Err(e) = persisted {
            tracing::error!(
                session_id = %session_id,
                error = %e,
                "Point stored but session record not persisted"
            );
            return Err(e);
        }

        tracing::trace!(
            session_id = %session_id,
            timestamp = stored.timestamp,
            sequence = stored.sequence,
            "Ingested point"
        );

        Ok(Accepted {
            session_id: stored.session_id,
            timestamp: stored.timestamp,
            sequence: stored.sequence,
            late_arrival,
            dropped_parameters,
            degraded: false,
        })
    }

    /// Ingest points in order, collecting per-point failures
    pub async fn ingest_batch(
        &self,
        session_id: &str,
        inputs: Vec<PointInput>,
    ) -> TelemetryResult<BatchOutcome> {
        validate_session_id(session_id)?;

        if inputs.is_empty() {
            return Err(TelemetryError::invalid("Empty batch"));
        }

        if inputs.len() > MAX_BATCH_SIZE {
            return Err(TelemetryError::invalid(format!(
                "Batch size exceeds maximum of {} points",
                MAX_BATCH_SIZE
            )));
        }

        let mut outcome = BatchOutcome::default();
        for (index, input) in inputs.into_iter().enumerate() {
            match self.ingest(session_id, input).await {
                Ok(accepted) => outcome.accepted.push(accepted),
                Err(e) => outcome.errors.push(BatchError {
                    index,
                    kind: e.kind(),
                    error: e.to_string(),
                }),
            }
        }

        if !outcome.is_complete() {
            tracing::warn!(
                session_id = %session_id,
                accepted = outcome.accepted.len(),
                rejected = outcome.errors.len(),
                "Partial batch ingest"
            );
        }

        Ok(outcome)
    }
}
