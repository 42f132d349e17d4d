//! Cluster membership data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Membership status of a cluster peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Up,
    Down,
    Unknown,
}

/// Deterministic node id derived from host and port, so two peers that
/// independently learn about the same address agree on its identity
/// without a handshake.
pub fn derive_node_id(host: &str, port: u16) -> String {
    format!("node-{}-{port}", host.replace('.', "-"))
}

/// A node participating in the cluster, known either by static config or
/// discovered through gossip.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNode {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub status: NodeStatus,
    #[serde(with = "beacon_common::time::millis")]
    pub last_seen: DateTime<Utc>,
}

impl ClusterNode {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let node_id = derive_node_id(&host, port);
        Self {
            node_id,
            host,
            port,
            status: NodeStatus::Unknown,
            last_seen: Utc::now(),
        }
    }

    pub fn with_node_id(node_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            node_id: node_id.into(),
            host: host.into(),
            port,
            status: NodeStatus::Unknown,
            last_seen: Utc::now(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_healthy(&self) -> bool {
        self.status == NodeStatus::Up
    }
}

/// Cluster-wide membership snapshot, as returned by the cluster status
/// endpoint.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    pub cluster_id: String,
    pub nodes: Vec<ClusterNode>,
    pub current_node: String,
    pub total_nodes: usize,
    pub healthy_nodes: usize,
}

impl ClusterStatus {
    /// Strict majority of known nodes must be UP; an exact half does not
    /// count as quorum.
    pub fn is_healthy(&self) -> bool {
        self.healthy_nodes > self.total_nodes / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_is_derived_from_host_and_port() {
        assert_eq!(derive_node_id("10.0.0.1", 8500), "node-10-0-0-1-8500");
    }

    #[test]
    fn cluster_status_requires_strict_majority() {
        let status = ClusterStatus {
            cluster_id: "beacon".to_string(),
            nodes: Vec::new(),
            current_node: "node-a".to_string(),
            total_nodes: 2,
            healthy_nodes: 1,
        };
        assert!(!status.is_healthy());
    }
}
