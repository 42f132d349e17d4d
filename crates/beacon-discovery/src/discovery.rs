//! Read-side facade: service and instance lookups, plus a live event
//! stream per service for watchers.

use std::sync::Arc;

use beacon_common::RegistryError;
use beacon_core::{CatalogStatistics, CatalogStore, EventBus, ServiceInstance};
use tokio_stream::wrappers::BroadcastStream;

/// Read-only view over the catalog, handed to HTTP handlers and to any
/// client-side SDK equivalent.
pub struct DiscoveryFacade {
    catalog: Arc<CatalogStore>,
    events: Arc<EventBus>,
}

fn validate_service_id(service_id: &str) -> Result<(), RegistryError> {
    if beacon_common::ids::is_valid_identifier(service_id) {
        Ok(())
    } else {
        Err(RegistryError::invalid(format!("invalid serviceId: {service_id}")))
    }
}

impl DiscoveryFacade {
    pub fn new(catalog: Arc<CatalogStore>, events: Arc<EventBus>) -> Self {
        Self { catalog, events }
    }

    pub fn discover(&self, service_id: &str) -> Result<Vec<ServiceInstance>, RegistryError> {
        validate_service_id(service_id)?;
        Ok(self.catalog.get_instances(service_id))
    }

    pub fn discover_healthy(&self, service_id: &str) -> Result<Vec<ServiceInstance>, RegistryError> {
        validate_service_id(service_id)?;
        Ok(self.catalog.get_healthy_instances(service_id))
    }

    pub fn get_instance(&self, service_id: &str, instance_id: &str) -> Option<ServiceInstance> {
        self.catalog.get_instance(service_id, instance_id)
    }

    pub fn get_catalog(&self) -> Vec<String> {
        self.catalog.get_services()
    }

    pub fn statistics(&self) -> CatalogStatistics {
        self.catalog.statistics()
    }

    /// Subscribes to registration, deregistration, renewal and status
    /// change events for a single service.
    pub fn watch_service(
        &self,
        service_id: &str,
    ) -> BroadcastStream<beacon_core::ServiceEvent> {
        BroadcastStream::new(self.events.subscribe_service(service_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::InstanceStatus;
    use tokio_stream::StreamExt;

    fn facade() -> (DiscoveryFacade, Arc<CatalogStore>) {
        let events = Arc::new(EventBus::new());
        let catalog = Arc::new(CatalogStore::new(Arc::clone(&events)));
        (DiscoveryFacade::new(Arc::clone(&catalog), events), catalog)
    }

    #[test]
    fn discover_healthy_filters_by_status() {
        let (facade, catalog) = facade();
        let mut up = ServiceInstance::new("orders", "o1", "127.0.0.1", 8080);
        up.status = InstanceStatus::Up;
        catalog.register(up).unwrap();
        let mut down = ServiceInstance::new("orders", "o2", "127.0.0.1", 8081);
        down.status = InstanceStatus::Down;
        catalog.register(down).unwrap();

        assert_eq!(facade.discover("orders").unwrap().len(), 2);
        assert_eq!(facade.discover_healthy("orders").unwrap().len(), 1);
    }

    #[test]
    fn discover_rejects_invalid_service_id() {
        let (facade, _catalog) = facade();
        assert!(facade.discover("orders/v1").is_err());
        assert!(facade.discover_healthy("orders/v1").is_err());
    }

    #[tokio::test]
    async fn watch_service_observes_registration() {
        let (facade, catalog) = facade();
        let mut stream = facade.watch_service("orders");
        let mut instance = ServiceInstance::new("orders", "o1", "127.0.0.1", 8080);
        instance.status = InstanceStatus::Up;
        catalog.register(instance).unwrap();

        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.service_id, "orders");
    }
}
