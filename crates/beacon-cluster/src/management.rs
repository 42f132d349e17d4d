//! Cluster membership management: peer health probing, failover
//! detection and leader election.
//!
//! Leader election is the teacher's non-Byzantine scheme verbatim: the
//! smallest node id among currently-healthy nodes is the leader. No
//! term numbers, no quorum vote -- fine for advisory leadership (who
//! runs a periodic sweep), wrong for anything requiring strong
//! consistency guarantees.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::model::{ClusterNode, ClusterStatus, NodeStatus};
use crate::node_cache::NodeCache;

/// Period of the quorum-loss warning loop (spec: fixed, not configurable).
const FAILOVER_MONITOR_INTERVAL: Duration = Duration::from_secs(10);
/// Period of the leader re-election loop (spec: fixed, not configurable).
const LEADER_ELECTION_INTERVAL: Duration = Duration::from_secs(30);

pub struct ClusterManager {
    local_node_id: String,
    node_cache: Arc<NodeCache>,
    client: reqwest::Client,
    probe_timeout: Duration,
    running: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ClusterManager {
    pub fn new(local_node_id: impl Into<String>, node_cache: Arc<NodeCache>) -> Self {
        Self {
            local_node_id: local_node_id.into(),
            node_cache,
            client: reqwest::Client::new(),
            probe_timeout: Duration::from_secs(3),
            running: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Starts the peer health probe, failover monitor and leader election
    /// loops. Safe to call once; a second call is a no-op until `stop`.
    pub fn start(self: &Arc<Self>, probe_interval: Duration) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        info!("starting cluster management");

        let probe_mgr = Arc::clone(self);
        let probe_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(probe_interval);
            while probe_mgr.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                probe_mgr.probe_all_peers().await;
            }
        });

        let failover_mgr = Arc::clone(self);
        let failover_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FAILOVER_MONITOR_INTERVAL);
            while failover_mgr.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if failover_mgr.needs_failover() {
                    warn!(
                        node_id = %failover_mgr.local_node_id,
                        "cluster quorum lost: fewer than half of known nodes are healthy"
                    );
                }
            }
        });

        let election_mgr = Arc::clone(self);
        let election_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(LEADER_ELECTION_INTERVAL);
            let mut last_leader = None;
            while election_mgr.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                let leader = election_mgr.elect_leader();
                if leader != last_leader {
                    info!(node_id = %election_mgr.local_node_id, leader = ?leader, "leader election result changed");
                    last_leader = leader;
                }
            }
        });

        *self.tasks.lock() = vec![probe_task, failover_task, election_task];
    }

    /// Stops every loop spawned by `start`. Cancellation is immediate
    /// (`abort`), not a graceful drain.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!("stopped cluster management");
    }

    pub fn add_node(&self, node: ClusterNode) {
        info!(node_id = %node.node_id, address = %node.address(), "cluster node added");
        self.node_cache.put_node(node);
    }

    /// Removes a node from membership. If it happened to be the current
    /// leader, the next `elect_leader` call re-derives leadership from
    /// the remaining healthy set -- there is no cached leader to go stale.
    pub fn remove_node(&self, node_id: &str) {
        let was_leader = self.elect_leader().as_deref() == Some(node_id);
        if self.node_cache.remove_node(node_id).is_some() {
            info!(node_id, was_leader, "cluster node removed");
        }
    }

    pub fn cluster_status(&self) -> ClusterStatus {
        self.node_cache.cluster_status()
    }

    pub fn all_nodes(&self) -> Vec<ClusterNode> {
        self.node_cache.get_all_nodes()
    }

    pub fn is_cluster_healthy(&self) -> bool {
        self.cluster_status().is_healthy()
    }

    /// Smallest node id among healthy peers is the leader. A
    /// single-node cluster (no peers registered) is always its own
    /// leader.
    pub fn is_leader(&self) -> bool {
        self.elect_leader()
            .map(|leader_id| leader_id == self.local_node_id)
            .unwrap_or(true)
    }

    pub fn elect_leader(&self) -> Option<String> {
        let mut healthy: Vec<String> = self.node_cache.get_healthy_nodes().into_iter().map(|n| n.node_id).collect();
        if healthy.is_empty() {
            return None;
        }
        healthy.sort();
        healthy.into_iter().next()
    }

    /// Probes a single peer's health endpoint and updates its status in
    /// the node cache accordingly.
    pub async fn probe_peer(&self, node_id: &str) {
        let Some(node) = self.node_cache.get_node(node_id) else {
            return;
        };
        let url = format!("http://{}/internal/cluster/health", node.address());
        let healthy = match tokio::time::timeout(self.probe_timeout, self.client.get(&url).send()).await {
            Ok(Ok(response)) => response.status().is_success(),
            _ => false,
        };

        let new_status = if healthy { NodeStatus::Up } else { NodeStatus::Down };
        if node.status != new_status {
            warn!(node_id, from = ?node.status, to = ?new_status, "cluster peer status changed");
        }
        self.node_cache.update_node_status(node_id, new_status);

        if node.status != NodeStatus::Down && new_status == NodeStatus::Down {
            self.perform_failover(node_id);
        }
    }

    /// Probes every known peer concurrently. Intended to be called on a
    /// fixed interval by the server's background task set.
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

    /// True when fewer than half of known nodes are healthy (integer
    /// division, so 1 of 2 does not trip this). Declarative only: the
    /// caller decides what to do about it, this just answers the question.
    pub fn needs_failover(&self) -> bool {
        let status = self.cluster_status();
        status.healthy_nodes < status.total_nodes / 2
    }

    /// Demotes a node to DOWN so it drops out of leader election and
    /// quorum counting immediately rather than waiting for the next
    /// probe cycle.
    pub fn perform_failover(&self, node_id: &str) {
        warn!(node_id, "performing failover");
        self.node_cache.update_node_status(node_id, NodeStatus::Down);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a manager with `local` already seeded into the cache as UP,
    /// mirroring how `beacon-server` wires `AppState` -- a real deployment
    /// always knows about itself, so no test should exercise a manager
    /// that doesn't.
    fn manager(local: &str) -> ClusterManager {
        let cache = Arc::new(NodeCache::new(local));
        cache.put_node(ClusterNode::with_node_id(local, "10.0.0.1", 8500));
        cache.update_node_status(local, NodeStatus::Up);
        ClusterManager::new(local, cache)
    }

    fn node(id: &str) -> ClusterNode {
        ClusterNode::with_node_id(id, "10.0.0.1", 8500)
    }

    #[test]
    fn single_node_cluster_is_always_leader() {
        let mgr = manager("node-a");
        assert!(mgr.is_leader());
        assert!(mgr.is_cluster_healthy());
    }

    #[test]
    fn leader_is_smallest_healthy_node_id() {
        let mgr = manager("node-b");
        mgr.add_node(node("node-a"));
        mgr.add_node(node("node-b"));
        mgr.node_cache.update_node_status("node-a", NodeStatus::Up);
        mgr.node_cache.update_node_status("node-b", NodeStatus::Up);

        assert_eq!(mgr.elect_leader(), Some("node-a".to_string()));
        assert!(!mgr.is_leader());
    }

    #[test]
    fn down_node_drops_out_of_leader_election() {
        let mgr = manager("node-b");
        mgr.add_node(node("node-a"));
        mgr.add_node(node("node-b"));
        mgr.node_cache.update_node_status("node-a", NodeStatus::Down);
        mgr.node_cache.update_node_status("node-b", NodeStatus::Up);

        assert_eq!(mgr.elect_leader(), Some("node-b".to_string()));
        assert!(mgr.is_leader());
    }

    #[test]
    fn cluster_health_requires_strict_majority() {
        let mgr = manager("node-a");
        mgr.add_node(node("node-a"));
        mgr.add_node(node("node-b"));
        mgr.node_cache.update_node_status("node-a", NodeStatus::Up);
        // 1 of 2 up is exactly half, not a majority.
        assert!(!mgr.is_cluster_healthy());
    }

    #[test]
    fn needs_failover_trips_below_half() {
        let mgr = manager("node-a");
        mgr.add_node(node("node-a"));
        mgr.add_node(node("node-b"));
        mgr.add_node(node("node-c"));
        mgr.node_cache.update_node_status("node-a", NodeStatus::Up);
        // 1 of 3 healthy: 1 < 3/2 (integer division = 1) is false.
        assert!(!mgr.needs_failover());

        mgr.node_cache.update_node_status("node-a", NodeStatus::Down);
        assert!(mgr.needs_failover());
    }

    #[test]
    fn perform_failover_marks_node_down() {
        let mgr = manager("node-a");
        mgr.add_node(node("node-b"));
        mgr.node_cache.update_node_status("node-b", NodeStatus::Up);
        mgr.perform_failover("node-b");
        assert_eq!(mgr.node_cache.get_node("node-b").unwrap().status, NodeStatus::Down);
    }

    #[tokio::test]
    async fn probe_peer_transition_to_down_runs_failover() {
        let mgr = manager("node-a");
        // Port 1 refuses connections immediately, so the probe fails and
        // the peer transitions Up -> Down.
        mgr.add_node(ClusterNode::with_node_id("node-b", "127.0.0.1", 1));
        mgr.node_cache.update_node_status("node-b", NodeStatus::Up);
        mgr.probe_peer("node-b").await;
        assert_eq!(mgr.node_cache.get_node("node-b").unwrap().status, NodeStatus::Down);
    }
}
