//! Health/Stats Monitor

pub mod monitor;

pub use monitor::{HealthMonitor, HealthReport, HealthStatus, SessionStats};
