//! Stream Message Types
//!
//! JSON envelope that streaming transports (SSE, WebSocket, the CLI
//! `simulate` output) write for each subscription event.
//!
//! The `type` tag is snake_case; fields are camelCase like every other
//! payload the crate serializes.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::storage::DataPoint;

/// Messages sent from the engine to a live consumer
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Subscription established
    #[serde(rename_all = "camelCase")]
    Subscribed {
        session_id: String,
        subscription: u64,
    },
    /// A new data point was ingested
    #[serde(rename_all = "camelCase")]
    DataPoint {
        session_id: String,
        /// Timestamp in milliseconds
        timestamp: i64,
        sequence: u64,
        parameters: BTreeMap<String, f64>,
    },
    /// Subscription cancelled
    Unsubscribed { subscription: u64 },
    /// Error description
    Error { message: String },
}

impl StreamMessage {
    pub fn from_point(point: &DataPoint) -> Self {
        StreamMessage::DataPoint {
            session_id: point.session_id.clone(),
            timestamp: point.timestamp,
            sequence: point.sequence,
            parameters: point.parameters.clone(),
        }
    }

    /// Single-line JSON, as written to a stream
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"serialization failed: {}"}}"#, e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_data_point() {
        let point = DataPoint::new("S1", 1699000000000).param("rpm", 812.0);
        let json = StreamMessage::from_point(&point).to_json();

        assert!(json.contains("\"type\":\"data_point\""));
        assert!(json.contains("\"sessionId\":\"S1\""));
        assert!(!json.contains("session_id"));
        assert!(json.contains("\"rpm\":812.0"));
    }

    #[test]
    fn test_serialize_subscribed() {
        let msg = StreamMessage::Subscribed {
            session_id: "S1".to_string(),
            subscription: 3,
        };
        let json = msg.to_json();
        assert!(json.contains("\"type\":\"subscribed\""));
        assert!(json.contains("\"sessionId\":\"S1\""));
        assert!(json.contains("\"subscription\":3"));
    }
}
