//! Core types for the fabric.
//!
//! - **IDs**: strongly-typed service identifiers
//! - **Errors**: application error types with thiserror derives
//! - **Config**: configuration for the broker, directory, client and transport

mod config;
mod errors;
mod ids;

pub use config::{
    BrokerConfig, ClientConfig, Config, DirectoryConfig, ObservabilityConfig, TransportConfig,
};
pub use errors::{Error, Result};
pub use ids::ServiceId;
