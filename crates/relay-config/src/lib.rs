//! # Relay Config
//!
//! Configuration management for Relay.
//! Layers configuration files and environment variables, then validates
//! the result once at startup.

mod app_config;
mod loader;
mod validation;

pub use app_config::*;
pub use loader::*;
pub use validation::*;
