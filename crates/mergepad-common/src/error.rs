//! Error types for configuration handling.

use std::path::PathBuf;

use miette::Diagnostic;

/// Errors from loading or saving a [`Config`](crate::Config).
#[derive(thiserror::Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum ConfigError {
    /// Reading or writing the config file failed.
    #[error("failed to access config file {}", .path.display())]
    #[diagnostic(code(mergepad::config::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file extension is not one we know how to parse.
    #[error("unsupported config format for {}", .path.display())]
    #[diagnostic(
        code(mergepad::config::format),
        help("use a file ending in .json or .toml")
    )]
    UnsupportedFormat { path: PathBuf },

    #[error("invalid JSON config")]
    #[diagnostic(code(mergepad::config::json))]
    Json(#[from] serde_json::Error),

    #[error("invalid TOML config")]
    #[diagnostic(code(mergepad::config::toml))]
    TomlDe(#[from] toml::de::Error),

    #[error("failed to serialize config as TOML")]
    #[diagnostic(code(mergepad::config::toml))]
    TomlSer(#[from] toml::ser::Error),

    /// A value that parsed but makes no sense.
    #[error("invalid config value for `{field}`: {reason}")]
    #[diagnostic(code(mergepad::config::value))]
    Invalid { field: &'static str, reason: String },
}
