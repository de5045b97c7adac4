//! Builders
//!
//! Fluent builder for the Fleet API credential configuration.

pub mod config;

pub use config::{fleet_auth_config, FleetAuthConfigBuilder};
