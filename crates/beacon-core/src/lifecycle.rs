//! Lifecycle orchestration on top of the catalog: registration,
//! heartbeat-driven renewal, timeout detection and the bounded
//! status-history ring kept per instance.

use std::{collections::VecDeque, sync::Arc};

use beacon_common::RegistryError;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::info;

use crate::{
    catalog::CatalogStore,
    events::EventBus,
    model::{HealthEvent, InstanceStatus, ServiceInstance},
};

/// Bounded per-instance ring of past status transitions, kept for
/// diagnostics and for the cluster status endpoint.
const HISTORY_CAPACITY: usize = 32;

#[derive(Clone, Debug, serde::Serialize)]
pub struct StatusHistoryEntry {
    pub from: InstanceStatus,
    pub to: InstanceStatus,
    #[serde(with = "beacon_common::time::millis")]
    pub at: DateTime<Utc>,
}

fn history_key(service_id: &str, instance_id: &str) -> String {
    format!("{service_id}::{instance_id}")
}

/// Drives instance lifecycle transitions: registration, heartbeat renewal,
/// deregistration and timeout-driven status changes. Delegates storage to
/// [`CatalogStore`] and keeps the bounded history ring alongside it.
pub struct LifecycleManager {
    catalog: Arc<CatalogStore>,
    events: Arc<EventBus>,
    history: DashMap<String, VecDeque<StatusHistoryEntry>>,
}

impl LifecycleManager {
    pub fn new(catalog: Arc<CatalogStore>, events: Arc<EventBus>) -> Self {
        Self {
            catalog,
            events,
            history: DashMap::new(),
        }
    }

    pub fn handle_registration(&self, instance: ServiceInstance) -> Result<(), RegistryError> {
        let service_id = instance.service_id.clone();
        let instance_id = instance.instance_id.clone();
        let status = instance.status;
        self.catalog.register(instance)?;
        self.record_transition(&service_id, &instance_id, status, status);
        Ok(())
    }

    /// Transitions the instance to OUT_OF_SERVICE so the `ServiceEvent`
    /// snapshot carried on the deregistration event reflects its final
    /// status, then removes it from the catalog and purges its history.
    pub fn handle_deregistration(&self, service_id: &str, instance_id: &str) -> Result<(), RegistryError> {
        self.update_status(service_id, instance_id, InstanceStatus::OutOfService, "deregistering")?;
        self.catalog.deregister(service_id, instance_id)?;
        self.history.remove(&history_key(service_id, instance_id));
        Ok(())
    }

    /// Renews the heartbeat. A live heartbeat is evidence the instance is
    /// reachable again, so STARTING, DOWN and UNKNOWN all recover to UP;
    /// OUT_OF_SERVICE is an operator decision and stays put.
    pub fn handle_heartbeat(&self, service_id: &str, instance_id: &str) -> Result<(), RegistryError> {
        self.catalog.renew(service_id, instance_id)?;

        if let Some(instance) = self.catalog.get_instance(service_id, instance_id) {
            match instance.status {
                InstanceStatus::Starting | InstanceStatus::Down | InstanceStatus::Unknown => {
                    self.update_status(service_id, instance_id, InstanceStatus::Up, "heartbeat received")?;
                }
                InstanceStatus::Up | InstanceStatus::OutOfService => {}
            }
        }
        Ok(())
    }

    pub fn is_heartbeat_timeout(&self, instance: &ServiceInstance, timeout: Duration) -> bool {
        Utc::now() - instance.last_heartbeat > timeout
    }

    /// Invoked by the heartbeat monitor when an instance has missed its
    /// deadline. UP degrades to DOWN first; only a DOWN instance stale for
    /// twice the timeout falls all the way to UNKNOWN. Every other status
    /// is left alone.
    pub fn handle_heartbeat_timeout(
        &self,
        service_id: &str,
        instance_id: &str,
        timeout: Duration,
    ) -> Result<(), RegistryError> {
        let Some(instance) = self.catalog.get_instance(service_id, instance_id) else {
            return Ok(());
        };

        match instance.status {
            InstanceStatus::Up => {
                self.update_status(service_id, instance_id, InstanceStatus::Down, "heartbeat timeout")
            }
            InstanceStatus::Down if Utc::now() - instance.last_heartbeat > timeout * 2 => {
                self.update_status(service_id, instance_id, InstanceStatus::Unknown, "heartbeat timeout exceeded twice")
            }
            _ => Ok(()),
        }
    }

    pub fn update_status(
        &self,
        service_id: &str,
        instance_id: &str,
        new_status: InstanceStatus,
        reason: &str,
    ) -> Result<(), RegistryError> {
        let previous = self
            .catalog
            .get_instance(service_id, instance_id)
            .map(|i| i.status);

        self.catalog.update_instance_status(service_id, instance_id, new_status)?;

        if let Some(previous) = previous {
            self.record_transition(service_id, instance_id, previous, new_status);
            if previous != new_status {
                info!(service_id, instance_id, %previous, %new_status, reason, "instance status changed");
                self.events.publish_health_event(HealthEvent::new(
                    instance_id,
                    previous,
                    new_status,
                    reason,
                ));
            }
        }
        Ok(())
    }

    pub fn status_history(&self, service_id: &str, instance_id: &str) -> Vec<StatusHistoryEntry> {
        self.history
            .get(&history_key(service_id, instance_id))
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn record_transition(&self, service_id: &str, instance_id: &str, from: InstanceStatus, to: InstanceStatus) {
        let mut ring = self
            .history
            .entry(history_key(service_id, instance_id))
            .or_insert_with(VecDeque::new);
        if ring.len() >= HISTORY_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(StatusHistoryEntry { from, to, at: Utc::now() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> LifecycleManager {
        let events = Arc::new(EventBus::new());
        let catalog = Arc::new(CatalogStore::new(Arc::clone(&events)));
        LifecycleManager::new(catalog, events)
    }

    fn instance(id: &str) -> ServiceInstance {
        let mut i = ServiceInstance::new("orders", id, "127.0.0.1", 8080);
        i.status = InstanceStatus::Up;
        i
    }

    #[test]
    fn registration_seeds_history() {
        let mgr = manager();
        mgr.handle_registration(instance("o1")).unwrap();
        assert_eq!(mgr.status_history("orders", "o1").len(), 1);
    }

    #[test]
    fn heartbeat_timeout_moves_up_to_down_first() {
        let mgr = manager();
        mgr.handle_registration(instance("o1")).unwrap();
        mgr.handle_heartbeat_timeout("orders", "o1", Duration::seconds(90)).unwrap();
        let current = mgr.catalog.get_instance("orders", "o1").unwrap();
        assert_eq!(current.status, InstanceStatus::Down);
    }

    #[test]
    fn stale_down_instance_falls_to_unknown_after_double_timeout() {
        let mgr = manager();
        mgr.handle_registration(instance("o1")).unwrap();
        mgr.update_status("orders", "o1", InstanceStatus::Down, "probe failed").unwrap();
        mgr.catalog.backdate_heartbeat("orders", "o1", Duration::seconds(200));

        mgr.handle_heartbeat_timeout("orders", "o1", Duration::seconds(90)).unwrap();
        let current = mgr.catalog.get_instance("orders", "o1").unwrap();
        assert_eq!(current.status, InstanceStatus::Unknown);
    }

    #[test]
    fn heartbeat_recovers_down_instance_to_up() {
        let mgr = manager();
        mgr.handle_registration(instance("o1")).unwrap();
        mgr.handle_heartbeat_timeout("orders", "o1", Duration::seconds(90)).unwrap();
        mgr.handle_heartbeat("orders", "o1").unwrap();
        let current = mgr.catalog.get_instance("orders", "o1").unwrap();
        assert_eq!(current.status, InstanceStatus::Up);
    }

    #[test]
    fn history_ring_is_bounded() {
        let mgr = manager();
        mgr.handle_registration(instance("o1")).unwrap();
        for _ in 0..40 {
            mgr.update_status("orders", "o1", InstanceStatus::Down, "probe").unwrap();
            mgr.update_status("orders", "o1", InstanceStatus::Up, "probe").unwrap();
        }
        assert!(mgr.status_history("orders", "o1").len() <= HISTORY_CAPACITY);
    }

    #[test]
    fn deregistration_clears_history() {
        let mgr = manager();
        mgr.handle_registration(instance("o1")).unwrap();
        mgr.handle_deregistration("orders", "o1").unwrap();
        assert!(mgr.status_history("orders", "o1").is_empty());
    }
}
