//! Configuration resolution and connection initialization for a Helm provider
//!
//! Provider-level configuration and per-operation overrides are merged by
//! [`resolver::OverridableConfig`]. [`connection::ConnectionFactory`] turns
//! the result into a cluster client and action context, one build at a time
//! per [`settings::ProviderState`]. [`registry::RegistryLoginCoordinator`]
//! logs in to each OCI registry host at most once.

#![deny(missing_docs)]

pub mod connection;
pub mod driver;
pub mod env;
pub mod error;
pub mod kubeconfig;
pub mod registry;
pub mod resolver;
pub mod schema;
pub mod settings;
pub mod source;
pub mod telemetry;

pub use connection::{ConnectionFactory, ConnectionHandle};
pub use error::Error;
pub use registry::{ChartLocation, RegistryLoginCoordinator, RegistryLoginRegistry};
pub use resolver::OverridableConfig;
pub use settings::ProviderState;
pub use source::{ConfigData, ConfigSource};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
