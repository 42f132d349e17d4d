//! Cluster gossip sync: outbound propagation of local catalog mutations
//! to peers, and inbound application of peer mutations with loop
//! suppression.
//!
//! Grounded on the teacher's distro protocol handler (`get_all_keys` /
//! `get_data` / `process_sync_data` / `get_snapshot`), simplified to a
//! single flat event stream since this registry has no namespace/group
//! hierarchy to shard by.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use beacon_core::{CatalogStore, InstanceStatus, ServiceEvent, ServiceEventType, ServiceInstance};
use beacon_discovery::ClusterPropagator;
use dashmap::DashSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::model::NodeStatus;
use crate::node_cache::NodeCache;

/// Caps the loop-suppression dedup set; beyond this the oldest entries
/// are dropped wholesale rather than tracked with per-entry expiry.
const SEEN_EVENT_CAP: usize = 8192;

/// Wire envelope for a gossiped event: carries the originating node so a
/// receiver can tell its own echoes apart from genuinely new events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GossipMessage {
    pub origin_node_id: String,
    pub event: ServiceEvent,
}

pub struct ClusterSync {
    local_node_id: String,
    catalog: Arc<CatalogStore>,
    node_cache: Arc<NodeCache>,
    client: reqwest::Client,
    probe_timeout: Duration,
    seq: AtomicU64,
    seen_event_ids: DashSet<String>,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ClusterSync {
    pub fn new(local_node_id: impl Into<String>, catalog: Arc<CatalogStore>, node_cache: Arc<NodeCache>) -> Self {
        Self {
            local_node_id: local_node_id.into(),
            catalog,
            node_cache,
            client: reqwest::Client::new(),
            probe_timeout: Duration::from_secs(5),
            seq: AtomicU64::new(0),
            seen_event_ids: DashSet::new(),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    fn next_nanos(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Probes a single peer's `/actuator/health` endpoint (distinct from
    /// `ClusterManager`'s own `/internal/cluster/health` probe) and
    /// updates its status in the shared node cache, logging only on a
    /// genuine transition.
    pub async fn probe_peer(&self, node_id: &str) {
        let Some(node) = self.node_cache.get_node(node_id) else {
            return;
        };
        let url = format!("http://{}/actuator/health", node.address());
        let healthy = match tokio::time::timeout(self.probe_timeout, self.client.get(&url).send()).await {
            Ok(Ok(response)) => response.status().is_success(),
            _ => false,
        };

        if healthy {
            if node.status != NodeStatus::Up {
                info!(node_id, "cluster peer back online");
            }
            self.node_cache.update_node_status(node_id, NodeStatus::Up);
        } else if node.status == NodeStatus::Up {
            warn!(node_id, "cluster peer down");
            self.node_cache.update_node_status(node_id, NodeStatus::Down);
        }
    }

    /// Probes every known peer concurrently, on the same cadence as
    /// `start`'s ticker.
    pub async fn probe_all_peers(&self) {
        let node_ids: Vec<String> = self
            .node_cache
            .get_all_nodes()
            .into_iter()
            .filter(|n| n.node_id != self.local_node_id)
            .map(|n| n.node_id)
            .collect();

        let probes = node_ids.iter().map(|node_id| self.probe_peer(node_id));
        futures::future::join_all(probes).await;
    }

    /// Starts the periodic peer health probe loop (`cluster.syncInterval`).
    /// Safe to call once; a second call is a no-op until `stop`.
    pub fn start(self: &Arc<Self>, interval: Duration) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        info!("starting cluster sync peer probe");
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            while this.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                this.probe_all_peers().await;
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
        info!("stopped cluster sync peer probe");
    }

    /// Sends a gossip message to every known healthy peer except self.
    /// Fire-and-forget: a peer that is temporarily unreachable catches up
    /// on the next full snapshot exchange instead of blocking the caller.
    fn broadcast(&self, event: ServiceEvent) {
        let message = GossipMessage {
            origin_node_id: self.local_node_id.clone(),
            event,
        };
        self.seen_event_ids.insert(message.event.event_id.clone());

        for peer in self.node_cache.get_healthy_nodes() {
            if peer.node_id == self.local_node_id {
                continue;
            }
            let client = self.client.clone();
            let url = format!("http://{}/internal/cluster/events", peer.address());
            let message = message.clone();
            tokio::spawn(async move {
                if let Err(err) = client.post(&url).json(&message).send().await {
                    warn!(peer = %url, error = %err, "failed to gossip event to peer");
                }
            });
        }
    }

    /// Applies an inbound gossip message. Returns `true` if the event was
    /// new and applied, `false` if it was suppressed (our own echo or a
    /// duplicate already processed).
    pub fn receive(&self, message: GossipMessage) -> bool {
        if message.origin_node_id == self.local_node_id {
            debug!("suppressing self-originated gossip event");
            return false;
        }
        if !self.seen_event_ids.insert(message.event.event_id.clone()) {
            debug!(event_id = %message.event.event_id, "suppressing duplicate gossip event");
            return false;
        }
        if self.seen_event_ids.len() > SEEN_EVENT_CAP {
            self.seen_event_ids.clear();
        }

        self.apply_locally(&message.event);
        true
    }

    /// Applies an event to the local catalog without re-broadcasting it --
    /// re-gossiping an already-gossiped event is exactly how naive flood
    /// protocols end up in an infinite loop.
    fn apply_locally(&self, event: &ServiceEvent) {
        let result = match event.event_type {
            ServiceEventType::Register => event
                .instance
                .clone()
                .map(|instance| self.catalog.register(instance))
                .unwrap_or(Ok(())),
            ServiceEventType::Deregister => self.catalog.deregister(&event.service_id, &event.instance_id),
            ServiceEventType::Renew => self.catalog.renew(&event.service_id, &event.instance_id),
            ServiceEventType::StatusChange => event
                .instance
                .as_ref()
                .map(|instance| {
                    self.catalog
                        .update_instance_status(&event.service_id, &event.instance_id, instance.status)
                })
                .unwrap_or(Ok(())),
            ServiceEventType::HealthCheck => Ok(()),
        };
        if let Err(err) = result {
            warn!(service_id = %event.service_id, instance_id = %event.instance_id, error = %err, "failed to apply gossiped event");
        }
    }

    /// Full catalog snapshot, sent to a newly joined peer so it doesn't
    /// have to wait for the next mutation of every service to catch up.
    pub fn snapshot(&self) -> Vec<ServiceInstance> {
        self.catalog.get_all_instances()
    }

    /// Applies a snapshot received from a peer. Idempotent: registering
    /// an instance that already exists just overwrites it.
    pub fn apply_snapshot(&self, instances: Vec<ServiceInstance>) {
        for instance in instances {
            if let Err(err) = self.catalog.register(instance) {
                warn!(error = %err, "failed to apply snapshot instance");
            }
        }
    }
}

impl ClusterPropagator for ClusterSync {
    fn propagate_registration(&self, instance: &ServiceInstance) {
        let nanos = self.next_nanos();
        self.broadcast(ServiceEvent::new(
            ServiceEventType::Register,
            instance.service_id.clone(),
            instance.instance_id.clone(),
            Some(instance.clone()),
            nanos,
        ));
    }

    fn propagate_deregistration(&self, service_id: &str, instance_id: &str) {
        let nanos = self.next_nanos();
        self.broadcast(ServiceEvent::new(
            ServiceEventType::Deregister,
            service_id,
            instance_id,
            None,
            nanos,
        ));
    }

    fn propagate_renewal(&self, service_id: &str, instance_id: &str) {
        let nanos = self.next_nanos();
        self.broadcast(ServiceEvent::new(
            ServiceEventType::Renew,
            service_id,
            instance_id,
            None,
            nanos,
        ));
    }

    fn propagate_status_change(&self, service_id: &str, instance_id: &str, status: InstanceStatus) {
        let nanos = self.next_nanos();
        let mut instance = self.catalog.get_instance(service_id, instance_id);
        if let Some(instance) = instance.as_mut() {
            instance.status = status;
        }
        self.broadcast(ServiceEvent::new(
            ServiceEventType::StatusChange,
            service_id,
            instance_id,
            instance,
            nanos,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::EventBus;

    fn sync() -> ClusterSync {
        let events = Arc::new(EventBus::new());
        let catalog = Arc::new(CatalogStore::new(events));
        ClusterSync::new("node-a", catalog, Arc::new(NodeCache::new("node-a")))
    }

    fn register_event(service_id: &str, instance_id: &str) -> ServiceEvent {
        let mut instance = ServiceInstance::new(service_id, instance_id, "127.0.0.1", 8080);
        instance.status = InstanceStatus::Up;
        ServiceEvent::new(ServiceEventType::Register, service_id, instance_id, Some(instance), 1)
    }

    #[test]
    fn self_originated_event_is_suppressed() {
        let sync = sync();
        let message = GossipMessage {
            origin_node_id: "node-a".to_string(),
            event: register_event("orders", "o1"),
        };
        assert!(!sync.receive(message));
        assert!(sync.catalog.get_instance("orders", "o1").is_none());
    }

    #[test]
    fn peer_event_is_applied_once() {
        let sync = sync();
        let message = GossipMessage {
            origin_node_id: "node-b".to_string(),
            event: register_event("orders", "o1"),
        };
        assert!(sync.receive(message.clone()));
        assert!(sync.catalog.get_instance("orders", "o1").is_some());

        // Replaying the identical event is suppressed as a duplicate.
        assert!(!sync.receive(message));
    }

    #[tokio::test]
    async fn probe_peer_marks_unreachable_node_down() {
        let sync = sync();
        sync.node_cache.put_node(crate::model::ClusterNode::with_node_id("node-b", "127.0.0.1", 1));
        sync.node_cache.update_node_status("node-b", NodeStatus::Up);
        sync.probe_peer("node-b").await;
        assert_eq!(sync.node_cache.get_node("node-b").unwrap().status, NodeStatus::Down);
    }

    #[test]
    fn snapshot_round_trips_into_a_fresh_catalog() {
        let sync = sync();
        let mut instance = ServiceInstance::new("orders", "o1", "127.0.0.1", 8080);
        instance.status = InstanceStatus::Up;
        sync.catalog.register(instance).unwrap();

        let other = sync();
        other.apply_snapshot(sync.snapshot());
        assert!(other.catalog.get_instance("orders", "o1").is_some());
    }
}
