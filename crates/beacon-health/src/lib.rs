//! Passive heartbeat monitoring and active health checking on top of
//! `beacon-core`'s catalog and lifecycle manager.

pub mod checker;
pub mod config;
pub mod heartbeat;

pub use checker::HealthChecker;
pub use config::{HealthCheckerConfig, HeartbeatMonitorConfig};
pub use heartbeat::{HeartbeatCheckResult, HeartbeatMonitor};
