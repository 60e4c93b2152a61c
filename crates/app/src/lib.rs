//! Application wiring: configuration and the demo scenario behind the
//! `reportdesk` binary.

pub mod config;
pub mod demo;

pub use config::{AppConfig, ConfigError};
