//! Write-side facade: registration, heartbeat renewal, deregistration and
//! status updates, with an optional hook for propagating mutations to
//! cluster peers.

use std::sync::Arc;

use beacon_common::RegistryError;
use beacon_core::{InstanceStatus, LifecycleManager, ServiceInstance};

/// Implemented by the cluster sync component so the registry facade can
/// gossip mutations without depending on the cluster crate directly.
pub trait ClusterPropagator: Send + Sync {
    fn propagate_registration(&self, instance: &ServiceInstance);
    fn propagate_deregistration(&self, service_id: &str, instance_id: &str);
    fn propagate_renewal(&self, service_id: &str, instance_id: &str);
    fn propagate_status_change(&self, service_id: &str, instance_id: &str, status: InstanceStatus);
}

/// Write-side operations on the catalog. Every mutation goes through the
/// lifecycle manager so the state machine and the bounded history ring
/// stay authoritative, then (if clustering is enabled) is gossiped.
pub struct RegistryFacade {
    lifecycle: Arc<LifecycleManager>,
    propagator: Option<Arc<dyn ClusterPropagator>>,
}

impl RegistryFacade {
    pub fn new(lifecycle: Arc<LifecycleManager>) -> Self {
        Self { lifecycle, propagator: None }
    }

    pub fn with_propagator(lifecycle: Arc<LifecycleManager>, propagator: Arc<dyn ClusterPropagator>) -> Self {
        Self { lifecycle, propagator: Some(propagator) }
    }

    pub fn register(&self, instance: ServiceInstance) -> Result<(), RegistryError> {
        self.lifecycle.handle_registration(instance.clone())?;
        if let Some(p) = &self.propagator {
            p.propagate_registration(&instance);
        }
        Ok(())
    }

    pub fn deregister(&self, service_id: &str, instance_id: &str) -> Result<(), RegistryError> {
        self.lifecycle.handle_deregistration(service_id, instance_id)?;
        if let Some(p) = &self.propagator {
            p.propagate_deregistration(service_id, instance_id);
        }
        Ok(())
    }

    pub fn renew(&self, service_id: &str, instance_id: &str) -> Result<(), RegistryError> {
        self.lifecycle.handle_heartbeat(service_id, instance_id)?;
        if let Some(p) = &self.propagator {
            p.propagate_renewal(service_id, instance_id);
        }
        Ok(())
    }

    pub fn update_status(
        &self,
        service_id: &str,
        instance_id: &str,
        status: InstanceStatus,
    ) -> Result<(), RegistryError> {
        self.lifecycle.update_status(service_id, instance_id, status, "api request")?;
        if let Some(p) = &self.propagator {
            p.propagate_status_change(service_id, instance_id, status);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{CatalogStore, EventBus};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPropagator {
        registrations: Mutex<Vec<String>>,
    }

    impl ClusterPropagator for RecordingPropagator {
        fn propagate_registration(&self, instance: &ServiceInstance) {
            self.registrations.lock().unwrap().push(instance.instance_id.clone());
        }
        fn propagate_deregistration(&self, _service_id: &str, _instance_id: &str) {}
        fn propagate_renewal(&self, _service_id: &str, _instance_id: &str) {}
        fn propagate_status_change(&self, _service_id: &str, _instance_id: &str, _status: InstanceStatus) {}
    }

    fn lifecycle() -> Arc<LifecycleManager> {
        let events = Arc::new(EventBus::new());
        let catalog = Arc::new(CatalogStore::new(Arc::clone(&events)));
        Arc::new(LifecycleManager::new(catalog, events))
    }

    #[test]
    fn register_invokes_propagator() {
        let propagator = Arc::new(RecordingPropagator::default());
        let facade = RegistryFacade::with_propagator(lifecycle(), propagator.clone());
        let mut instance = ServiceInstance::new("orders", "o1", "127.0.0.1", 8080);
        instance.status = InstanceStatus::Up;
        facade.register(instance).unwrap();
        assert_eq!(propagator.registrations.lock().unwrap().as_slice(), ["o1"]);
    }

    #[test]
    fn register_without_propagator_still_succeeds() {
        let facade = RegistryFacade::new(lifecycle());
        let mut instance = ServiceInstance::new("orders", "o1", "127.0.0.1", 8080);
        instance.status = InstanceStatus::Up;
        assert!(facade.register(instance).is_ok());
    }

    #[test]
    fn update_status_rejects_illegal_transition() {
        let facade = RegistryFacade::new(lifecycle());
        let mut instance = ServiceInstance::new("orders", "o1", "127.0.0.1", 8080);
        instance.status = InstanceStatus::Up;
        facade.register(instance).unwrap();
        assert!(facade.update_status("orders", "o1", InstanceStatus::Starting).is_err());
    }
}
