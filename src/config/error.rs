use std::path::PathBuf;
use thiserror::Error;

/// Problems with arguments, configuration or the log directory. All of
/// these are detected before any backend work begins.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Log directory {path} is not usable: {source}")]
    LogDirUnusable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No usable log directory: tried {tried:?}")]
    NoUsableLogDir { tried: Vec<PathBuf> },

    #[error("Rollback source not found: {path}")]
    RollbackSourceMissing { path: PathBuf },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
