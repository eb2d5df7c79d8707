pub mod config;
pub mod server;
pub mod services;

pub use services::{
    ConsulClient, ConsulConfig, NodeData, RegistryConfig, RegistryError, RegistryState,
    ServiceRegistry,
};
