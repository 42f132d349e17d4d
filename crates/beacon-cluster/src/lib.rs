//! Cluster node cache, gossip-based sync and leader election.

pub mod management;
pub mod model;
pub mod node_cache;
pub mod sync;

pub use management::ClusterManager;
pub use model::{ClusterNode, ClusterStatus, NodeStatus, derive_node_id};
pub use node_cache::NodeCache;
pub use sync::{ClusterSync, GossipMessage};
