//! Discovery (read) and registry (write) facades over `beacon-core`.

pub mod discovery;
pub mod registry;

pub use discovery::DiscoveryFacade;
pub use registry::{ClusterPropagator, RegistryFacade};
