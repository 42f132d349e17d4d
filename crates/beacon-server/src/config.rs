//! Process configuration, sourced from CLI flags and `HSC_REGISTRY_SERVER_*`
//! environment variables, mapped 1:1 to the dotted properties named in the
//! external interface. There is no config file and no persisted state --
//! every field here is either a runtime knob or cluster bootstrap info.

use std::time::Duration;

use clap::Parser;

#[derive(Parser, Clone, Debug)]
#[command(name = "beacon-registry", about = "In-memory service discovery registry")]
pub struct ServerConfig {
    #[arg(long, env = "HSC_REGISTRY_SERVER_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    #[arg(long, env = "HSC_REGISTRY_SERVER_PORT", default_value_t = 8500)]
    pub port: u16,

    /// Stable id for this node. Generated at startup if unset; cluster
    /// deployments should pin this so restarts don't change leader math.
    #[arg(long, env = "HSC_REGISTRY_SERVER_NODE_ID")]
    pub node_id: Option<String>,

    #[arg(long, env = "HSC_REGISTRY_SERVER_CLUSTER_ENABLED", default_value_t = false)]
    pub cluster_enabled: bool,

    /// Comma-separated `host:port` pairs for the initial peer set. Each
    /// peer's node id is derived, never supplied -- see
    /// `beacon_cluster::derive_node_id`.
    #[arg(long, env = "HSC_REGISTRY_SERVER_CLUSTER_NODES", value_delimiter = ',')]
    pub cluster_nodes: Vec<String>,

    #[arg(long, env = "HSC_REGISTRY_SERVER_CLUSTER_SYNC_INTERVAL", default_value_t = 10)]
    pub cluster_sync_interval: u64,

    #[arg(long, env = "HSC_REGISTRY_SERVER_HEARTBEAT_TIMEOUT_SECS", default_value_t = 90)]
    pub heartbeat_timeout_secs: u64,

    #[arg(long, env = "HSC_REGISTRY_SERVER_HEARTBEAT_SCAN_INTERVAL_SECS", default_value_t = 30)]
    pub heartbeat_scan_interval_secs: u64,

    #[arg(long, env = "HSC_REGISTRY_SERVER_SECURITY_ENABLED", default_value_t = false)]
    pub security_enabled: bool,

    /// Shared-secret API key. Requests must present it via the header
    /// named by `security_header_name`, an `Authorization: Bearer`
    /// header, or an `accessToken` query parameter.
    #[arg(long, env = "HSC_REGISTRY_SERVER_SECURITY_API_KEY")]
    pub security_api_key: Option<String>,

    #[arg(long, env = "HSC_REGISTRY_SERVER_SECURITY_HEADER_NAME", default_value = "accessToken")]
    pub security_header_name: String,

    #[arg(long, env = "HSC_REGISTRY_SERVER_HEALTH_CHECK_ENABLED", default_value_t = true)]
    pub health_check_enabled: bool,

    #[arg(long, env = "HSC_REGISTRY_SERVER_HEALTH_CHECK_DEFAULT_INTERVAL", default_value_t = 30)]
    pub health_check_default_interval: u64,

    #[arg(long, env = "HSC_REGISTRY_SERVER_HEALTH_CHECK_DEFAULT_TIMEOUT", default_value_t = 5)]
    pub health_check_default_timeout: u64,

    #[arg(long, env = "HSC_REGISTRY_SERVER_HEALTH_CHECK_MAX_RETRY", default_value_t = 3)]
    pub health_check_max_retry: u32,

    #[arg(long, env = "HSC_REGISTRY_SERVER_HEALTH_CHECK_WORKER_POOL_SIZE", default_value_t = 10)]
    pub health_check_worker_pool_size: usize,

    /// Accepted for interface parity with the source system; this
    /// registry has exactly one storage backend (in-memory) and logs a
    /// warning if anything else is requested.
    #[arg(long, env = "HSC_REGISTRY_SERVER_STORAGE_TYPE", default_value = "memory")]
    pub storage_type: String,

    #[arg(long, env = "HSC_REGISTRY_SERVER_STORAGE_EVICTION_INTERVAL", default_value_t = 30)]
    pub storage_eviction_interval: u64,

    /// How long an instance may go without a heartbeat before the sweeper
    /// evicts it entirely (`cleanupExpired`'s `instanceExpiration`).
    #[arg(long, env = "HSC_REGISTRY_SERVER_STORAGE_INSTANCE_EXPIRATION", default_value_t = 90)]
    pub instance_expiration_secs: u64,

    #[arg(long, env = "HSC_REGISTRY_SERVER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "HSC_REGISTRY_SERVER_LOG_FILE_ENABLED", default_value_t = false)]
    pub log_file_enabled: bool,

    #[arg(long, env = "HSC_REGISTRY_SERVER_LOG_DIR", default_value = "./logs")]
    pub log_dir: String,
}

impl ServerConfig {
    /// Stable node id. Pinned operator value wins; otherwise derived from
    /// the bind address and port, matching the derivation peers use when
    /// they list this node in their own `CLUSTER_NODES` -- a random id
    /// would mean peers could never agree on who this node is.
    pub fn node_id(&self) -> String {
        self.node_id
            .clone()
            .unwrap_or_else(|| beacon_cluster::derive_node_id(&self.bind_address, self.port))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn heartbeat_scan_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_scan_interval_secs)
    }

    pub fn health_check_default_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_default_interval)
    }

    pub fn health_check_default_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_default_timeout)
    }

    pub fn cluster_probe_interval(&self) -> Duration {
        Duration::from_secs(self.cluster_sync_interval)
    }

    pub fn catalog_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.storage_eviction_interval)
    }

    pub fn instance_expiration(&self) -> Duration {
        Duration::from_secs(self.instance_expiration_secs)
    }

    /// `None` when authentication is off, otherwise the secret requests
    /// must present.
    pub fn effective_api_key(&self) -> Option<String> {
        if self.security_enabled { self.security_api_key.clone() } else { None }
    }

    pub fn logging_config(&self) -> beacon_common::logging::LoggingConfig {
        beacon_common::logging::LoggingConfig {
            console_enabled: true,
            file_enabled: self.log_file_enabled,
            log_dir: self.log_dir.clone().into(),
            default_level: self.log_level.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_with_no_arguments() {
        let config = ServerConfig::parse_from(["beacon-registry"]);
        assert_eq!(config.port, 8500);
        assert_eq!(config.heartbeat_timeout_secs, 90);
        assert_eq!(config.heartbeat_scan_interval_secs, 30);
        assert_eq!(config.instance_expiration_secs, 90);
        assert!(config.cluster_nodes.is_empty());
        assert!(!config.cluster_enabled);
        assert!(!config.security_enabled);
    }

    #[test]
    fn derived_node_id_matches_the_convention_peers_use() {
        let config = ServerConfig::parse_from(["beacon-registry"]);
        assert_eq!(config.node_id(), beacon_cluster::derive_node_id(&config.bind_address, config.port));
    }

    #[test]
    fn pinned_node_id_overrides_derivation() {
        let mut config = ServerConfig::parse_from(["beacon-registry"]);
        config.node_id = Some("node-pinned".to_string());
        assert_eq!(config.node_id(), "node-pinned");
    }

    #[test]
    fn security_disabled_ignores_configured_key() {
        let mut config = ServerConfig::parse_from(["beacon-registry"]);
        config.security_api_key = Some("secret".to_string());
        assert!(config.effective_api_key().is_none());
    }
}
