//! Core data model for the service catalog.
//!
//! Defines `ServiceInstance`, its lifecycle status, the embedded health
//! check configuration, and the two event types the catalog publishes.

use std::{collections::HashMap, time::Duration};

use beacon_common::RegistryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a registered instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Up,
    Down,
    Starting,
    Unknown,
    OutOfService,
}

impl InstanceStatus {
    /// An instance is healthy iff its status is UP.
    pub fn is_healthy(self) -> bool {
        matches!(self, InstanceStatus::Up)
    }

    /// Transition table from the lifecycle state machine.
    pub fn can_transition_to(self, to: InstanceStatus) -> bool {
        use InstanceStatus::*;

        if self == to {
            return true; // self-transitions are no-ops, not failures
        }

        matches!(
            (self, to),
            (Starting, Up | Down | Unknown | OutOfService)
                | (Up, Down | Unknown | OutOfService)
                | (Down, Up | Unknown | OutOfService)
                | (Unknown, Up | Down | OutOfService | Starting)
                | (OutOfService, Up | Down | Unknown | Starting)
        )
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceStatus::Up => "UP",
            InstanceStatus::Down => "DOWN",
            InstanceStatus::Starting => "STARTING",
            InstanceStatus::Unknown => "UNKNOWN",
            InstanceStatus::OutOfService => "OUT_OF_SERVICE",
        };
        write!(f, "{s}")
    }
}

/// Active health probe protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthCheckType {
    Http,
    Tcp,
    /// Stub: always reports UP. The original system never implements this
    /// probe type; the behavior is preserved rather than invented.
    Script,
}

/// Embedded health-check configuration for an instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(with = "duration_secs", default = "default_interval")]
    pub interval: Duration,
    #[serde(with = "duration_secs", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(rename = "type", default = "default_check_type")]
    pub check_type: HealthCheckType,
}

fn default_true() -> bool {
    true
}
fn default_path() -> String {
    "/actuator/health".to_string()
}
fn default_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_retry_count() -> u32 {
    3
}
fn default_check_type() -> HealthCheckType {
    HealthCheckType::Http
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_path(),
            interval: default_interval(),
            timeout: default_timeout(),
            retry_count: default_retry_count(),
            check_type: default_check_type(),
        }
    }
}

impl HealthCheckConfig {
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.path.trim().is_empty() {
            return Err(RegistryError::invalid("healthCheck.path must not be blank"));
        }
        if self.interval < Duration::from_secs(1) {
            return Err(RegistryError::invalid("healthCheck.interval must be >= 1s"));
        }
        if self.timeout < Duration::from_secs(1) {
            return Err(RegistryError::invalid("healthCheck.timeout must be >= 1s"));
        }
        if self.timeout >= self.interval {
            return Err(RegistryError::invalid(
                "healthCheck.timeout must be strictly less than healthCheck.interval",
            ));
        }
        if self.retry_count < 1 {
            return Err(RegistryError::invalid("healthCheck.retryCount must be >= 1"));
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

/// A registered service instance, identified by `(service_id, instance_id)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    pub service_id: String,
    pub instance_id: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub secure: bool,
    pub status: InstanceStatus,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckConfig>,
    #[serde(with = "beacon_common::time::millis")]
    pub registration_time: DateTime<Utc>,
    #[serde(with = "beacon_common::time::millis")]
    pub last_heartbeat: DateTime<Utc>,
}

impl ServiceInstance {
    /// Build a fresh instance with STARTING status and both timestamps set
    /// to now -- callers that want to register as UP set `status` after.
    pub fn new(service_id: impl Into<String>, instance_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let now = Utc::now();
        Self {
            service_id: service_id.into(),
            instance_id: instance_id.into(),
            host: host.into(),
            port,
            secure: false,
            status: InstanceStatus::Starting,
            metadata: HashMap::new(),
            health_check: None,
            registration_time: now,
            last_heartbeat: now,
        }
    }

    pub fn uri(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    pub fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        if !beacon_common::ids::is_valid_identifier(&self.service_id) {
            return Err(RegistryError::invalid("serviceId is blank or contains illegal characters"));
        }
        if !beacon_common::ids::is_valid_identifier(&self.instance_id) {
            return Err(RegistryError::invalid("instanceId is blank or contains illegal characters"));
        }
        if self.host.trim().is_empty() {
            return Err(RegistryError::invalid("host must not be blank"));
        }
        if self.port == 0 {
            return Err(RegistryError::invalid("port must be in 1..65535"));
        }
        if let Some(hc) = &self.health_check {
            hc.validate()?;
        }
        Ok(())
    }
}

/// The kind of mutation that produced a `ServiceEvent`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceEventType {
    Register,
    Deregister,
    Renew,
    StatusChange,
    HealthCheck,
}

/// A catalog mutation, published on the per-service event stream and,
/// when clustering is enabled, gossiped to peers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEvent {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: ServiceEventType,
    pub service_id: String,
    pub instance_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<ServiceInstance>,
    #[serde(with = "beacon_common::time::millis")]
    pub timestamp: DateTime<Utc>,
}

impl ServiceEvent {
    pub fn new(
        event_type: ServiceEventType,
        service_id: impl Into<String>,
        instance_id: impl Into<String>,
        instance: Option<ServiceInstance>,
        nanos: u64,
    ) -> Self {
        let service_id = service_id.into();
        let instance_id = instance_id.into();
        Self {
            event_id: beacon_common::ids::event_id(&service_id, &instance_id, nanos),
            event_type,
            service_id,
            instance_id,
            instance,
            timestamp: Utc::now(),
        }
    }
}

/// A health-probe or lifecycle-driven status transition.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthEvent {
    pub event_id: String,
    pub instance_id: String,
    pub previous_status: InstanceStatus,
    pub current_status: InstanceStatus,
    pub message: String,
    #[serde(with = "beacon_common::time::millis")]
    pub timestamp: DateTime<Utc>,
}

impl HealthEvent {
    pub fn new(
        instance_id: impl Into<String>,
        previous_status: InstanceStatus,
        current_status: InstanceStatus,
        message: impl Into<String>,
    ) -> Self {
        let instance_id = instance_id.into();
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            instance_id,
            previous_status,
            current_status,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_status_changed(&self) -> bool {
        self.previous_status != self.current_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_matches_spec() {
        use InstanceStatus::*;

        assert!(Starting.can_transition_to(Up));
        assert!(Starting.can_transition_to(OutOfService));
        assert!(!Starting.can_transition_to(Starting) || Starting.can_transition_to(Starting));

        assert!(Up.can_transition_to(Down));
        assert!(!Up.can_transition_to(Starting));

        assert!(Down.can_transition_to(Up));
        assert!(!Down.can_transition_to(Starting));

        assert!(Unknown.can_transition_to(Starting));
        assert!(OutOfService.can_transition_to(Starting));
    }

    #[test]
    fn self_transition_is_a_noop_not_a_failure() {
        assert!(InstanceStatus::Up.can_transition_to(InstanceStatus::Up));
    }

    #[test]
    fn only_up_is_healthy() {
        assert!(InstanceStatus::Up.is_healthy());
        assert!(!InstanceStatus::Down.is_healthy());
        assert!(!InstanceStatus::Starting.is_healthy());
    }

    #[test]
    fn health_check_config_rejects_timeout_ge_interval() {
        let cfg = HealthCheckConfig {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(5),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn health_check_config_default_is_valid() {
        assert!(HealthCheckConfig::default().validate().is_ok());
    }

    #[test]
    fn instance_uri_selects_scheme_from_secure_flag() {
        let mut inst = ServiceInstance::new("orders", "o1", "10.0.0.1", 8080);
        assert_eq!(inst.uri(), "http://10.0.0.1:8080");
        inst.secure = true;
        assert_eq!(inst.uri(), "https://10.0.0.1:8080");
    }

    #[test]
    fn instance_validation_rejects_illegal_ids() {
        let inst = ServiceInstance::new("orders/v1", "o1", "10.0.0.1", 8080);
        assert!(inst.validate().is_err());
    }

    #[test]
    fn health_event_status_changed() {
        let event = HealthEvent::new("o1", InstanceStatus::Up, InstanceStatus::Down, "probe failed");
        assert!(event.is_status_changed());
        let unchanged = HealthEvent::new("o1", InstanceStatus::Up, InstanceStatus::Up, "still up");
        assert!(!unchanged.is_status_changed());
    }
}
