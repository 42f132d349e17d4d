//! In-memory service catalog: the concurrent two-level map of
//! `serviceId -> instanceId -> ServiceInstance`, plus the registration,
//! renewal and query operations built on top of it.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration as StdDuration,
};

use beacon_common::RegistryError;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::{
    events::EventBus,
    model::{ServiceEvent, ServiceEventType, ServiceInstance},
};

/// Snapshot counters returned by [`CatalogStore::statistics`].
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct CatalogStatistics {
    pub service_count: usize,
    pub instance_count: usize,
    pub healthy_instance_count: usize,
}

/// Concurrent catalog of registered service instances.
///
/// Mirrors the teacher's nested `DashMap<String, DashMap<String, Instance>>`
/// shape: the outer map never holds an empty inner map for longer than one
/// sweep interval, so `getServices()` never reports a service with zero
/// instances.
pub struct CatalogStore {
    instances: Arc<DashMap<String, DashMap<String, ServiceInstance>>>,
    events: Arc<EventBus>,
    shutdown: Arc<AtomicBool>,
    sweeper: Arc<parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl CatalogStore {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            instances: Arc::new(DashMap::new()),
            events,
            shutdown: Arc::new(AtomicBool::new(false)),
            sweeper: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// Spawns the background task that runs `cleanupExpired` and then
    /// prunes services left with zero instances. Safe to call once; a
    /// second call replaces the previous sweeper (the old one is dropped
    /// and stops on its next tick check).
    pub fn spawn_sweeper(&self, interval: StdDuration, instance_expiration: StdDuration) {
        let instances = Arc::clone(&self.instances);
        let shutdown = Arc::clone(&self.shutdown);
        let max_age = Duration::from_std(instance_expiration).unwrap_or_else(|_| Duration::seconds(90));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if shutdown.load(Ordering::Acquire) {
                    return;
                }
                let expired = Self::expire_stale_in(&instances, max_age);
                if !expired.is_empty() {
                    debug!(count = expired.len(), "catalog sweeper: evicted expired instances");
                }

                let empty: Vec<String> = instances
                    .iter()
                    .filter(|entry| entry.value().is_empty())
                    .map(|entry| entry.key().clone())
                    .collect();
                for service_id in empty {
                    instances.remove_if(&service_id, |_, v| v.is_empty());
                }
                debug!("catalog sweeper: pruned empty service entries");
            }
        });
        *self.sweeper.lock() = Some(handle);
    }

    fn ensure_running(&self) -> Result<(), RegistryError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(RegistryError::Unavailable(
                "catalog store has been shut down".to_string(),
            ));
        }
        Ok(())
    }

    pub fn register(&self, mut instance: ServiceInstance) -> Result<(), RegistryError> {
        self.ensure_running()?;
        instance.validate()?;

        let service_id = instance.service_id.clone();
        let instance_id = instance.instance_id.clone();
        instance.last_heartbeat = Utc::now();

        let bucket = self.instances.entry(service_id.clone()).or_default();
        bucket.insert(instance_id.clone(), instance.clone());
        drop(bucket);

        info!(service_id, instance_id, "instance registered");
        self.events.publish_service_event(ServiceEvent::new(
            ServiceEventType::Register,
            service_id,
            instance_id,
            Some(instance),
            monotonic_nanos(),
        ));
        Ok(())
    }

    pub fn deregister(&self, service_id: &str, instance_id: &str) -> Result<(), RegistryError> {
        self.ensure_running()?;

        let removed = self
            .instances
            .get(service_id)
            .and_then(|bucket| bucket.remove(instance_id))
            .map(|(_, instance)| instance);

        match removed {
            Some(instance) => {
                info!(service_id, instance_id, "instance deregistered");
                self.events.publish_service_event(ServiceEvent::new(
                    ServiceEventType::Deregister,
                    service_id,
                    instance_id,
                    Some(instance),
                    monotonic_nanos(),
                ));
                Ok(())
            }
            // NotFound never surfaces to the caller: deregistering an
            // instance that is already gone is a silent no-op.
            None => Ok(()),
        }
    }

    /// Refreshes `lastHeartbeat`. An absent service or instance is not an
    /// error -- renewing something that has already expired or was never
    /// registered is a silent no-op, same as `deregister`.
    pub fn renew(&self, service_id: &str, instance_id: &str) -> Result<(), RegistryError> {
        self.ensure_running()?;

        let Some(bucket) = self.instances.get(service_id) else {
            return Ok(());
        };
        let Some(mut entry) = bucket.get_mut(instance_id) else {
            return Ok(());
        };
        entry.last_heartbeat = Utc::now();
        let snapshot = entry.clone();
        drop(entry);
        drop(bucket);

        self.events.publish_service_event(ServiceEvent::new(
            ServiceEventType::Renew,
            service_id,
            instance_id,
            Some(snapshot),
            monotonic_nanos(),
        ));
        Ok(())
    }

    /// Applies a lifecycle status change, rejecting transitions the state
    /// machine forbids. An absent service or instance is not an error --
    /// same no-op rule as `renew` and `deregister`. Publishes a
    /// `StatusChange` event only when the status actually differs from
    /// the prior value.
    pub fn update_instance_status(
        &self,
        service_id: &str,
        instance_id: &str,
        new_status: crate::model::InstanceStatus,
    ) -> Result<(), RegistryError> {
        self.ensure_running()?;

        let Some(bucket) = self.instances.get(service_id) else {
            return Ok(());
        };
        let Some(mut entry) = bucket.get_mut(instance_id) else {
            return Ok(());
        };

        let previous = entry.status;
        if !previous.can_transition_to(new_status) {
            return Err(RegistryError::IllegalStateTransition {
                from: previous.to_string(),
                to: new_status.to_string(),
            });
        }
        let changed = previous != new_status;
        entry.status = new_status;
        let snapshot = entry.clone();
        drop(entry);
        drop(bucket);

        if changed {
            self.events.publish_service_event(ServiceEvent::new(
                ServiceEventType::StatusChange,
                service_id,
                instance_id,
                Some(snapshot),
                monotonic_nanos(),
            ));
        }
        Ok(())
    }

    pub fn get_instance(&self, service_id: &str, instance_id: &str) -> Option<ServiceInstance> {
        self.instances
            .get(service_id)
            .and_then(|bucket| bucket.get(instance_id).map(|e| e.clone()))
    }

    pub fn get_instances(&self, service_id: &str) -> Vec<ServiceInstance> {
        self.instances
            .get(service_id)
            .map(|bucket| bucket.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default()
    }

    pub fn get_healthy_instances(&self, service_id: &str) -> Vec<ServiceInstance> {
        self.get_instances(service_id)
            .into_iter()
            .filter(ServiceInstance::is_healthy)
            .collect()
    }

    pub fn get_services(&self) -> Vec<String> {
        self.instances
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn get_all_instances(&self) -> Vec<ServiceInstance> {
        self.instances
            .iter()
            .flat_map(|bucket| bucket.value().iter().map(|e| e.value().clone()).collect::<Vec<_>>())
            .collect()
    }

    pub fn statistics(&self) -> CatalogStatistics {
        let mut stats = CatalogStatistics::default();
        for bucket in self.instances.iter() {
            if bucket.value().is_empty() {
                continue;
            }
            stats.service_count += 1;
            for instance in bucket.value().iter() {
                stats.instance_count += 1;
                if instance.is_healthy() {
                    stats.healthy_instance_count += 1;
                }
            }
        }
        stats
    }

    /// Removes instances whose last heartbeat is older than `max_age`,
    /// returning what was evicted. This is `cleanupExpired`; it is called
    /// directly by tests and, in production, by the sweeper spawned from
    /// `spawn_sweeper` on every tick.
    pub fn expire_stale(&self, max_age: Duration) -> Vec<ServiceInstance> {
        Self::expire_stale_in(&self.instances, max_age)
    }

    fn expire_stale_in(
        instances: &DashMap<String, DashMap<String, ServiceInstance>>,
        max_age: Duration,
    ) -> Vec<ServiceInstance> {
        let cutoff = Utc::now() - max_age;
        let mut expired = Vec::new();
        for bucket in instances.iter() {
            let service_id = bucket.key().clone();
            let stale_ids: Vec<String> = bucket
                .value()
                .iter()
                .filter(|e| e.last_heartbeat < cutoff)
                .map(|e| e.key().clone())
                .collect();
            for instance_id in stale_ids {
                if let Some((_, instance)) = bucket.value().remove(&instance_id) {
                    warn!(service_id, instance_id, "instance expired: heartbeat timeout");
                    expired.push(instance);
                }
            }
        }
        expired
    }

    pub fn clear(&self) {
        self.instances.clear();
    }

    pub fn is_healthy(&self) -> bool {
        !self.shutdown.load(Ordering::Acquire)
    }

    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        info!("catalog store shut down");
    }

    /// Backdates an instance's heartbeat for timeout-path tests; register
    /// and renew always stamp the current time, so nothing in production
    /// code calls this.
    pub fn backdate_heartbeat(&self, service_id: &str, instance_id: &str, age: Duration) {
        if let Some(bucket) = self.instances.get(service_id)
            && let Some(mut entry) = bucket.get_mut(instance_id)
        {
            entry.last_heartbeat = Utc::now() - age;
        }
    }
}

fn monotonic_nanos() -> u64 {
    static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InstanceStatus;

    fn store() -> CatalogStore {
        CatalogStore::new(Arc::new(EventBus::new()))
    }

    fn instance(service: &str, id: &str) -> ServiceInstance {
        let mut i = ServiceInstance::new(service, id, "127.0.0.1", 8080);
        i.status = InstanceStatus::Up;
        i
    }

    #[test]
    fn register_then_lookup() {
        let store = store();
        store.register(instance("orders", "o1")).unwrap();
        assert_eq!(store.get_instances("orders").len(), 1);
        assert!(store.get_instance("orders", "o1").is_some());
    }

    #[test]
    fn register_rejects_invalid_instance() {
        let store = store();
        let bad = ServiceInstance::new("orders", "o1", "", 8080);
        assert!(store.register(bad).is_err());
    }

    #[test]
    fn deregister_unknown_instance_is_a_silent_noop() {
        let store = store();
        assert!(store.deregister("orders", "missing").is_ok());
    }

    #[test]
    fn deregistering_last_instance_leaves_service_empty_not_listed() {
        let store = store();
        store.register(instance("orders", "o1")).unwrap();
        store.deregister("orders", "o1").unwrap();
        assert!(store.get_services().is_empty());
        assert_eq!(store.get_instances("orders").len(), 0);
    }

    #[test]
    fn update_status_rejects_illegal_transition() {
        let store = store();
        store.register(instance("orders", "o1")).unwrap();
        let err = store
            .update_instance_status("orders", "o1", InstanceStatus::Starting)
            .unwrap_err();
        assert!(matches!(err, RegistryError::IllegalStateTransition { .. }));
    }

    #[test]
    fn renew_updates_heartbeat() {
        let store = store();
        store.register(instance("orders", "o1")).unwrap();
        let before = store.get_instance("orders", "o1").unwrap().last_heartbeat;
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.renew("orders", "o1").unwrap();
        let after = store.get_instance("orders", "o1").unwrap().last_heartbeat;
        assert!(after >= before);
    }

    #[test]
    fn statistics_counts_only_healthy_as_healthy() {
        let store = store();
        store.register(instance("orders", "o1")).unwrap();
        let mut down = instance("orders", "o2");
        down.status = InstanceStatus::Starting;
        store.register(down).unwrap();

        let stats = store.statistics();
        assert_eq!(stats.service_count, 1);
        assert_eq!(stats.instance_count, 2);
        assert_eq!(stats.healthy_instance_count, 1);
    }

    #[test]
    fn expire_stale_evicts_old_heartbeats() {
        let store = store();
        let mut stale = instance("orders", "o1");
        stale.last_heartbeat = Utc::now() - Duration::seconds(120);
        store.register(stale).unwrap();

        let expired = store.expire_stale(Duration::seconds(30));
        assert_eq!(expired.len(), 1);
        assert!(store.get_instance("orders", "o1").is_none());
    }

    #[tokio::test]
    async fn operations_fail_after_shutdown() {
        let store = store();
        store.shutdown().await;
        let err = store.register(instance("orders", "o1")).unwrap_err();
        assert!(matches!(err, RegistryError::Unavailable(_)));
        assert!(!store.is_healthy());
    }
}
