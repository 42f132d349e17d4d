//! Shared application state wired once at startup and handed to every
//! HTTP handler through actix's `web::Data`.

use std::sync::Arc;

use beacon_cluster::{ClusterManager, ClusterNode, ClusterSync, NodeCache, NodeStatus};
use beacon_core::{CatalogStore, EventBus, HealthCheckConfig, LifecycleManager};
use beacon_discovery::{DiscoveryFacade, RegistryFacade};
use beacon_health::{HealthChecker, HeartbeatMonitor};

use crate::config::ServerConfig;

pub struct AppState {
    pub node_id: String,
    pub discovery: DiscoveryFacade,
    pub registry: RegistryFacade,
    pub catalog: Arc<CatalogStore>,
    pub heartbeat_monitor: Arc<HeartbeatMonitor>,
    pub health_checker: Arc<HealthChecker>,
    pub cluster_sync: Arc<ClusterSync>,
    pub cluster_manager: Arc<ClusterManager>,
    pub cluster_enabled: bool,
    pub api_shared_secret: Option<String>,
    pub security_header_name: String,
    /// Applied to instances that register without an embedded
    /// `HealthCheckConfig`, when health checking is enabled server-wide.
    /// `None` when `HEALTH_CHECK_ENABLED` is off -- such instances are
    /// never actively probed, relying on heartbeats alone.
    pub default_health_check: Option<HealthCheckConfig>,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Self {
        let node_id = config.node_id();
        let events = Arc::new(EventBus::new());
        let catalog = Arc::new(CatalogStore::new(Arc::clone(&events)));
        catalog.spawn_sweeper(config.catalog_sweep_interval(), config.instance_expiration());

        let lifecycle = Arc::new(LifecycleManager::new(Arc::clone(&catalog), Arc::clone(&events)));

        let node_cache = Arc::new(NodeCache::new(node_id.clone()));
        // A cluster of one is always its own healthy majority: seed self
        // into the shared node cache so `ClusterStatus` and leader
        // election never see an empty membership table.
        node_cache.put_node(ClusterNode::with_node_id(node_id.clone(), config.bind_address.clone(), config.port));
        node_cache.update_node_status(&node_id, NodeStatus::Up);

        let cluster_sync = Arc::new(ClusterSync::new(node_id.clone(), Arc::clone(&catalog), Arc::clone(&node_cache)));
        let cluster_manager = Arc::new(ClusterManager::new(node_id.clone(), node_cache));

        let registry = if config.cluster_enabled {
            RegistryFacade::with_propagator(Arc::clone(&lifecycle), Arc::clone(&cluster_sync))
        } else {
            RegistryFacade::new(Arc::clone(&lifecycle))
        };
        let discovery = DiscoveryFacade::new(Arc::clone(&catalog), events);

        let heartbeat_monitor = Arc::new(HeartbeatMonitor::new(
            Arc::clone(&catalog),
            Arc::clone(&lifecycle),
            beacon_health::HeartbeatMonitorConfig {
                scan_interval: config.heartbeat_scan_interval(),
                heartbeat_timeout: config.heartbeat_timeout(),
            },
        ));

        let health_checker = Arc::new(HealthChecker::new(
            Arc::clone(&catalog),
            lifecycle,
            beacon_health::HealthCheckerConfig {
                worker_pool_size: config.health_check_worker_pool_size,
                default_timeout: config.health_check_default_timeout(),
            },
        ));

        Self {
            node_id,
            discovery,
            registry,
            catalog,
            heartbeat_monitor,
            health_checker,
            cluster_sync,
            cluster_manager,
            cluster_enabled: config.cluster_enabled,
            api_shared_secret: config.effective_api_key(),
            security_header_name: config.security_header_name.clone(),
            default_health_check: config.health_check_enabled.then(|| HealthCheckConfig {
                interval: config.health_check_default_interval(),
                timeout: config.health_check_default_timeout(),
                retry_count: config.health_check_max_retry,
                ..Default::default()
            }),
        }
    }

    pub async fn shutdown(&self) {
        self.heartbeat_monitor.stop();
        self.health_checker.stop();
        self.cluster_sync.stop();
        self.cluster_manager.stop();
        self.catalog.shutdown().await;
    }
}
