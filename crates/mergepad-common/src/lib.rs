//! Shared plumbing for mergepad: configuration files and tracing setup.

pub mod config;
pub mod error;
pub mod telemetry;

pub use config::{Config, EngineConfig, FileStore, Loader, Saver, TelemetrySettings};
pub use error::ConfigError;
