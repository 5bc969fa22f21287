//! Session Registry
//!
//! Tracks known sessions and their lifecycle:
//!
//! ```text
//! Unknown ──first point / open──► Active ──close──► Closed
//! ```
//!
//! There is no way back from `Closed`; points arriving afterwards are
//! accepted and counted as late arrivals. Removal is left to external
//! retention tooling.

pub mod registry;

pub use registry::{SessionRegistry, SessionWriter};
