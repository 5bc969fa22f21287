//! Pub/Sub Broadcaster
//!
//! Pushes each accepted point to live subscribers of its session.
//!
//! # Architecture
//!
//! ```text
//! ingest ──publish──► Broadcaster ─┬─ channel ─► delivery thread ─► callback
//!                                  └─ channel ─► delivery thread ─► callback
//! ```
//!
//! Streaming transports turn callback invocations into [`StreamMessage`]
//! lines for their clients.

pub mod hub;
pub mod messages;

pub use hub::{Broadcaster, HubConfig, SubscriptionHandle};
pub use messages::StreamMessage;
