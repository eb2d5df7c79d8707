//! Consul discovery backend
//!
//! Talks to the local Consul agent over its HTTP API:
//! - `config`: agent address, ACL token and request timeout
//! - `client`: `DiscoveryBackend` implementation

pub mod client;
pub mod config;

pub use client::ConsulClient;
pub use config::ConsulConfig;
