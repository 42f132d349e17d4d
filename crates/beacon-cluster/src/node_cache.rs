//! Concurrent cache of known cluster nodes.

use chrono::Utc;
use dashmap::DashMap;

use crate::model::{ClusterNode, ClusterStatus, NodeStatus};

pub struct NodeCache {
    local_node_id: String,
    nodes: DashMap<String, ClusterNode>,
}

impl NodeCache {
    pub fn new(local_node_id: impl Into<String>) -> Self {
        Self {
            local_node_id: local_node_id.into(),
            nodes: DashMap::new(),
        }
    }

    pub fn put_node(&self, node: ClusterNode) {
        self.nodes.insert(node.node_id.clone(), node);
    }

    pub fn remove_node(&self, node_id: &str) -> Option<ClusterNode> {
        self.nodes.remove(node_id).map(|(_, node)| node)
    }

    pub fn get_node(&self, node_id: &str) -> Option<ClusterNode> {
        self.nodes.get(node_id).map(|e| e.clone())
    }

    pub fn update_node_status(&self, node_id: &str, status: NodeStatus) {
        if let Some(mut node) = self.nodes.get_mut(node_id) {
            node.status = status;
            node.last_seen = Utc::now();
        }
    }

    pub fn get_all_nodes(&self) -> Vec<ClusterNode> {
        self.nodes.iter().map(|e| e.value().clone()).collect()
    }

    pub fn get_healthy_nodes(&self) -> Vec<ClusterNode> {
        self.nodes.iter().filter(|e| e.value().is_healthy()).map(|e| e.value().clone()).collect()
    }

    pub fn get_node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn get_healthy_node_count(&self) -> usize {
        self.nodes.iter().filter(|e| e.value().is_healthy()).count()
    }

    pub fn cluster_status(&self) -> ClusterStatus {
        let nodes = self.get_all_nodes();
        let healthy_nodes = nodes.iter().filter(|n| n.is_healthy()).count();
        ClusterStatus {
            cluster_id: "beacon".to_string(),
            total_nodes: nodes.len(),
            healthy_nodes,
            current_node: self.local_node_id.clone(),
            nodes,
        }
    }
}
