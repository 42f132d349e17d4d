//! Tunables for the heartbeat monitor and active health checker.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct HeartbeatMonitorConfig {
    /// How often the monitor scans the catalog for stale instances.
    pub scan_interval: Duration,
    /// An instance with no heartbeat for longer than this is considered
    /// timed out; an UP instance moves to DOWN, and a DOWN instance stale
    /// for twice this long falls further to UNKNOWN.
    pub heartbeat_timeout: Duration,
}

impl Default for HeartbeatMonitorConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
        }
    }
}

#[derive(Clone, Debug)]
pub struct HealthCheckerConfig {
    /// Number of instances probed concurrently.
    pub worker_pool_size: usize,
    /// Fallback timeout used when an instance has no embedded health
    /// check config.
    pub default_timeout: Duration,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 10,
            default_timeout: Duration::from_secs(5),
        }
    }
}
