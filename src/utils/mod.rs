//! Configuration utilities

pub mod config;

pub use config::{AnchorRegistry, ConfigError, LocatorConfig};
