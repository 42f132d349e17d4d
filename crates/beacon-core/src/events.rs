//! Event bus: per-service `ServiceEvent` multicast plus one global
//! `HealthEvent` multicast.
//!
//! Grounded on the teacher's member-change broadcast publisher: a
//! `tokio::sync::broadcast` channel per topic, lossy under backpressure,
//! with drops logged rather than surfaced to the publisher.

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::model::{HealthEvent, ServiceEvent};

const SERVICE_CHANNEL_CAPACITY: usize = 256;
const HEALTH_CHANNEL_CAPACITY: usize = 256;

/// Publishes catalog and health-check events to whoever is currently
/// watching. Subscribers that fall behind lose the oldest events rather
/// than stalling the publisher.
pub struct EventBus {
    service_channels: DashMap<String, broadcast::Sender<ServiceEvent>>,
    health_channel: broadcast::Sender<HealthEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (health_tx, _) = broadcast::channel(HEALTH_CHANNEL_CAPACITY);
        Self {
            service_channels: DashMap::new(),
            health_channel: health_tx,
        }
    }

    /// Subscribes to events for a single service. Creates the underlying
    /// channel lazily on first subscriber.
    pub fn subscribe_service(&self, service_id: &str) -> broadcast::Receiver<ServiceEvent> {
        self.service_channels
            .entry(service_id.to_string())
            .or_insert_with(|| broadcast::channel(SERVICE_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn subscribe_health(&self) -> broadcast::Receiver<HealthEvent> {
        self.health_channel.subscribe()
    }

    /// Publishes a service event. A channel with no subscribers is pruned
    /// immediately rather than kept around for a publisher that may never
    /// return.
    pub fn publish_service_event(&self, event: ServiceEvent) {
        let service_id = event.service_id.clone();
        let Some(sender) = self.service_channels.get(&service_id) else {
            trace!(service_id, "no subscribers for service event, dropping silently");
            return;
        };

        if sender.receiver_count() == 0 {
            drop(sender);
            self.service_channels.remove(&service_id);
            return;
        }

        if let Err(err) = sender.send(event) {
            warn!(service_id, error = %err, "failed to publish service event");
        }
    }

    pub fn publish_health_event(&self, event: HealthEvent) {
        if self.health_channel.receiver_count() == 0 {
            return;
        }
        if let Err(err) = self.health_channel.send(event) {
            warn!(error = %err, "failed to publish health event");
        }
    }

    /// Active per-service subscriptions currently tracked, for diagnostics.
    pub fn subscribed_service_count(&self) -> usize {
        self.service_channels.len()
    }
}
