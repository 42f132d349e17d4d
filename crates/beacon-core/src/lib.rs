//! Catalog storage, lifecycle state machine and event bus for the
//! service registry. No network transport lives here -- this crate is
//! the in-process core that `beacon-discovery`, `beacon-health` and
//! `beacon-cluster` build on.

pub mod catalog;
pub mod events;
pub mod lifecycle;
pub mod model;

pub use catalog::{CatalogStatistics, CatalogStore};
pub use events::EventBus;
pub use lifecycle::{LifecycleManager, StatusHistoryEntry};
pub use model::{
    HealthCheckConfig, HealthCheckType, HealthEvent, InstanceStatus, ServiceEvent, ServiceEventType,
    ServiceInstance,
};
