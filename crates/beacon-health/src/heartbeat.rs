//! Passive heartbeat monitor: periodically scans the catalog for
//! instances that have stopped renewing and hands them to the lifecycle
//! manager for a timeout transition.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use beacon_core::{CatalogStore, LifecycleManager};
use chrono::Duration as ChronoDuration;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::HeartbeatMonitorConfig;

/// Outcome of a single scan pass, surfaced for diagnostics and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeartbeatCheckResult {
    pub instances_checked: u64,
    pub timeouts_detected: u64,
}

pub struct HeartbeatMonitor {
    catalog: Arc<CatalogStore>,
    lifecycle: Arc<LifecycleManager>,
    config: HeartbeatMonitorConfig,
    running: Arc<AtomicBool>,
    checks_performed: Arc<AtomicU64>,
    timeouts_detected: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    pub fn new(catalog: Arc<CatalogStore>, lifecycle: Arc<LifecycleManager>, config: HeartbeatMonitorConfig) -> Self {
        Self {
            catalog,
            lifecycle,
            config,
            running: Arc::new(AtomicBool::new(false)),
            checks_performed: Arc::new(AtomicU64::new(0)),
            timeouts_detected: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }
    }

    pub fn start(self: &Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        info!("starting heartbeat monitor");
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.scan_interval);
            while this.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                this.scan_once();
            }
        });
        if let Some(old) = self.task.lock().replace(handle) {
            old.abort();
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        info!("stopped heartbeat monitor");
    }

    /// Runs a single scan pass synchronously. Exposed for tests and for
    /// callers that want an on-demand sweep outside the ticker.
    pub fn scan_once(&self) -> HeartbeatCheckResult {
        let timeout = ChronoDuration::from_std(self.config.heartbeat_timeout)
            .unwrap_or_else(|_| ChronoDuration::seconds(90));

        let mut result = HeartbeatCheckResult::default();
        for instance in self.catalog.get_all_instances() {
            result.instances_checked += 1;
            if !self.lifecycle.is_heartbeat_timeout(&instance, timeout) {
                continue;
            }

            result.timeouts_detected += 1;
            if let Err(err) = self
                .lifecycle
                .handle_heartbeat_timeout(&instance.service_id, &instance.instance_id, timeout)
            {
                warn!(
                    service_id = %instance.service_id,
                    instance_id = %instance.instance_id,
                    error = %err,
                    "failed to apply heartbeat timeout transition"
                );
            }
        }

        self.checks_performed.fetch_add(result.instances_checked, Ordering::Relaxed);
        self.timeouts_detected.fetch_add(result.timeouts_detected, Ordering::Relaxed);
        debug!(?result, "heartbeat scan complete");
        result
    }

    pub fn checks_performed(&self) -> u64 {
        self.checks_performed.load(Ordering::Relaxed)
    }

    pub fn timeouts_detected(&self) -> u64 {
        self.timeouts_detected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{EventBus, InstanceStatus, ServiceInstance};

    fn setup() -> (Arc<CatalogStore>, Arc<LifecycleManager>) {
        let events = Arc::new(EventBus::new());
        let catalog = Arc::new(CatalogStore::new(Arc::clone(&events)));
        let lifecycle = Arc::new(LifecycleManager::new(Arc::clone(&catalog), events));
        (catalog, lifecycle)
    }

    #[test]
    fn scan_detects_stale_heartbeat() {
        let (catalog, lifecycle) = setup();
        let mut instance = ServiceInstance::new("orders", "o1", "127.0.0.1", 8080);
        instance.status = InstanceStatus::Up;
        catalog.register(instance).unwrap();
        catalog.backdate_heartbeat("orders", "o1", chrono::Duration::seconds(60));

        let monitor = HeartbeatMonitor::new(
            catalog.clone(),
            lifecycle,
            HeartbeatMonitorConfig {
                heartbeat_timeout: std::time::Duration::from_secs(15),
                ..Default::default()
            },
        );
        let result = monitor.scan_once();
        assert_eq!(result.timeouts_detected, 1);
        assert_eq!(catalog.get_instance("orders", "o1").unwrap().status, InstanceStatus::Down);
    }

    #[test]
    fn scan_ignores_fresh_heartbeat() {
        let (catalog, lifecycle) = setup();
        let mut instance = ServiceInstance::new("orders", "o1", "127.0.0.1", 8080);
        instance.status = InstanceStatus::Up;
        catalog.register(instance).unwrap();

        let monitor = HeartbeatMonitor::new(catalog.clone(), lifecycle, HeartbeatMonitorConfig::default());
        let result = monitor.scan_once();
        assert_eq!(result.timeouts_detected, 0);
    }

    #[test]
    fn stale_unknown_instance_is_reported_but_left_unknown() {
        let (catalog, lifecycle) = setup();
        let mut instance = ServiceInstance::new("orders", "o1", "127.0.0.1", 8080);
        instance.status = InstanceStatus::Unknown;
        catalog.register(instance).unwrap();
        catalog.backdate_heartbeat("orders", "o1", chrono::Duration::seconds(200));

        let monitor = HeartbeatMonitor::new(
            catalog.clone(),
            lifecycle,
            HeartbeatMonitorConfig {
                heartbeat_timeout: std::time::Duration::from_secs(90),
                ..Default::default()
            },
        );
        let result = monitor.scan_once();
        assert_eq!(result.timeouts_detected, 1);
        assert_eq!(catalog.get_instance("orders", "o1").unwrap().status, InstanceStatus::Unknown);
    }
}
