//! Service registry module
//!
//! Registration lifecycle of one service instance, split into logical components:
//! - `types`: node data, registration payload, state and stats
//! - `error`: fatal registry errors and transient backend errors
//! - `backend`: capability set the registry consumes from a discovery backend
//! - `service`: the registration / keepalive / deregistration loop

pub mod backend;
pub mod error;
pub mod service;
pub mod types;

// Re-export public types for easier access
pub use backend::DiscoveryBackend;
pub use error::{BackendError, RegistryError};
pub use service::ServiceRegistry;
pub use types::{
    HealthCheck, HealthStatus, NodeData, RegistryConfig, RegistryState, RegistryStats,
    ServiceRegistration,
};
