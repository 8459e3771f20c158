//! Layered configuration: file, environment, then CLI overrides.

pub mod server;

pub use server::{Config, ConfigError, DatabaseConfig, LogFormat, LoggingConfig, StreamConfig};
