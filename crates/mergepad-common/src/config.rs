use serde::{Deserialize, Serialize};

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Top-level configuration for a mergepad host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Editing-session behaviour.
    pub engine: EngineConfig,
    /// Log output.
    pub telemetry: TelemetrySettings,
}

/// Tunables for an editing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Quiet period after an edit before the dirty check runs.
    pub dirty_debounce_ms: u64,
    /// Name of the loro text container holding the document body.
    pub text_container: String,
    /// Upper bound for the text diff used when splicing plain text into the
    /// CRDT. `None` lets it run to completion.
    pub update_timeout_ms: Option<f64>,
    /// Report equal-length changed regions as one hunk per line pair.
    pub split_paired_lines: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dirty_debounce_ms: 250,
            text_container: "content".to_owned(),
            update_timeout_ms: None,
            split_paired_lines: true,
        }
    }
}

impl EngineConfig {
    pub fn dirty_debounce(&self) -> Duration {
        Duration::from_millis(self.dirty_debounce_ms)
    }
}

/// Log settings, applied by [`crate::telemetry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Service name attached to startup logs.
    pub service_name: String,
    /// Default level when `RUST_LOG` is unset (e.g. "info").
    pub log_level: Option<String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            service_name: "mergepad".to_owned(),
            log_level: None,
        }
    }
}

impl Config {
    /// Loads the configuration from the provided loader.
    pub async fn load(loader: &impl Loader) -> Result<Self, ConfigError> {
        let config = loader.load().await?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration using the provided saver.
    pub async fn save(&self, saver: &impl Saver) -> Result<(), ConfigError> {
        saver.save(self).await
    }

    /// Reject values that deserialize but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.text_container.is_empty() {
            return Err(ConfigError::Invalid {
                field: "engine.text_container",
                reason: "must not be empty".to_owned(),
            });
        }
        if let Some(timeout) = self.engine.update_timeout_ms {
            if !(timeout.is_finite() && timeout > 0.0) {
                return Err(ConfigError::Invalid {
                    field: "engine.update_timeout_ms",
                    reason: format!("expected a positive number of milliseconds, got {timeout}"),
                });
            }
        }
        Ok(())
    }
}

/// The trait for loading configuration data.
pub trait Loader {
    /// Loads the configuration data.
    fn load(&self) -> impl Future<Output = Result<Config, ConfigError>> + Send;
}

/// The trait for saving configuration data.
pub trait Saver {
    /// Saves the configuration data.
    fn save(&self, config: &Config) -> impl Future<Output = Result<(), ConfigError>> + Send;
}

/// An implementation of [`Loader`] and [`Saver`] that reads and writes a configuration file.
pub struct FileStore {
    path: PathBuf,
}

#[derive(Clone, Copy)]
enum Format {
    Json,
    Toml,
}

impl FileStore {
    /// Create a new [`FileStore`] with the given path.
    ///
    /// The format is picked from the file extension: `.json` or `.toml`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn format(&self) -> Result<Format, ConfigError> {
        match self.path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Format::Json),
            Some("toml") => Ok(Format::Toml),
            _ => Err(ConfigError::UnsupportedFormat {
                path: self.path.clone(),
            }),
        }
    }

    fn io_error(&self, source: std::io::Error) -> ConfigError {
        ConfigError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Loader for FileStore {
    async fn load(&self) -> Result<Config, ConfigError> {
        let format = self.format()?;
        let raw = std::fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        let config = match format {
            Format::Json => serde_json::from_str(&raw)?,
            Format::Toml => toml::from_str(&raw)?,
        };
        tracing::debug!(path = %self.path.display(), "loaded config");
        Ok(config)
    }
}

impl Saver for FileStore {
    async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let raw = match self.format()? {
            Format::Json => serde_json::to_string_pretty(config)?,
            Format::Toml => toml::to_string_pretty(config)?,
        };
        std::fs::write(&self.path, raw).map_err(|e| self.io_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.dirty_debounce(), Duration::from_millis(250));
        assert_eq!(config.engine.text_container, "content");
        assert!(config.engine.split_paired_lines);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [engine]
            dirty_debounce_ms = 40
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.dirty_debounce_ms, 40);
        assert_eq!(config.engine.text_container, "content");
        assert_eq!(config.telemetry.service_name, "mergepad");
    }

    #[test]
    fn test_validate_rejects_empty_container() {
        let mut config = Config::default();
        config.engine.text_container.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "engine.text_container",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["mergepad.json", "mergepad.toml"] {
            let store = FileStore::new(dir.path().join(name));
            let mut config = Config::default();
            config.engine.dirty_debounce_ms = 75;
            config.engine.update_timeout_ms = Some(500.0);
            config.telemetry.log_level = Some("debug".to_owned());

            config.save(&store).await.unwrap();
            let loaded = Config::load(&store).await.unwrap();
            assert_eq!(loaded, config, "{name}");
        }
    }

    #[tokio::test]
    async fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("mergepad.yaml"));
        let err = Config::load(&store).await.unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("absent.toml"));
        let err = Config::load(&store).await.unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
