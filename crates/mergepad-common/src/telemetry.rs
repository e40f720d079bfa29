//! Tracing setup for mergepad hosts.
//!
//! # Usage
//!
//! ```ignore
//! use mergepad_common::telemetry::{self, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env("mergepad-host");
//! telemetry::init(config);
//! tracing::info!("session opened");
//! ```

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::TelemetrySettings;

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for labeling (e.g., "mergepad-host")
    pub service_name: String,
    /// Console log level (default: INFO, DEBUG in debug builds)
    pub console_level: Level,
}

impl TelemetryConfig {
    /// Defaults for `service_name`; `RUST_LOG` still overrides at init.
    pub fn from_env(service_name: impl Into<String>) -> Self {
        let console_level = if cfg!(debug_assertions) {
            Level::DEBUG
        } else {
            Level::INFO
        };

        Self {
            service_name: service_name.into(),
            console_level,
        }
    }

    /// Build from the `[telemetry]` section of a config file.
    ///
    /// An unparseable level falls back to the build default with a warning
    /// once tracing is up.
    pub fn from_settings(settings: &TelemetrySettings) -> (Self, Option<String>) {
        let mut config = Self::from_env(settings.service_name.clone());
        let mut rejected = None;
        if let Some(level) = &settings.log_level {
            match level.parse::<Level>() {
                Ok(level) => config.console_level = level,
                Err(_) => rejected = Some(level.clone()),
            }
        }
        (config, rejected)
    }
}

/// Install a compact console subscriber.
///
/// Returns `false` if a global subscriber was already set (for example by an
/// earlier test), in which case nothing changes.
pub fn init(config: TelemetryConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.console_level.as_str().to_lowercase()));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .with_filter(env_filter);

    let installed = tracing_subscriber::registry()
        .with(console_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(service = %config.service_name, "telemetry initialized");
    }
    installed
}

/// [`init`] from config-file settings, reporting a bad level once logging works.
pub fn init_from_settings(settings: &TelemetrySettings) -> bool {
    let (config, rejected) = TelemetryConfig::from_settings(settings);
    let installed = init(config);
    if let Some(level) = rejected {
        tracing::warn!(level = %level, "unknown log level in config, using default");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings_level() {
        let settings = TelemetrySettings {
            service_name: "svc".to_owned(),
            log_level: Some("warn".to_owned()),
        };
        let (config, rejected) = TelemetryConfig::from_settings(&settings);
        assert_eq!(config.console_level, Level::WARN);
        assert_eq!(config.service_name, "svc");
        assert!(rejected.is_none());
    }

    #[test]
    fn test_from_settings_bad_level() {
        let settings = TelemetrySettings {
            service_name: "svc".to_owned(),
            log_level: Some("loud".to_owned()),
        };
        let (_, rejected) = TelemetryConfig::from_settings(&settings);
        assert_eq!(rejected.as_deref(), Some("loud"));
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(TelemetryConfig::from_env("test"));
        assert!(!init(TelemetryConfig::from_env("test")));
    }
}
