pub mod consul;
pub mod registry;

pub use consul::{ConsulClient, ConsulConfig};
pub use registry::{NodeData, RegistryConfig, RegistryError, RegistryState, ServiceRegistry};
