//! Runtime configuration: optional YAML file, then command-line overrides

pub mod error;
pub mod layout;

pub use error::ConfigError;
pub use layout::*;

use crate::backends::{is_adapter_label, ADAPTER_LABELS};
use crate::config::error::Result;
use crate::system::DEFAULT_REBOOT_MARKER;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/upkeep/config.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaintenanceConfig {
    /// Log directory; the system default with per-user fallback when unset.
    pub log_dir: Option<PathBuf>,
    /// Upper bound for any single package-manager command.
    pub command_timeout_secs: u64,
    /// Offer the selection prompt when stdin is a terminal.
    pub interactive: bool,
    pub cleanup: bool,
    /// Recipient of the run report.
    pub email: Option<String>,
    /// Adapter labels to leave alone, e.g. `SNAP` or `FLATPAK_USER`.
    pub disabled_backends: Vec<String>,
    pub flatpak_user: bool,
    pub reboot_marker: PathBuf,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            command_timeout_secs: 3600,
            interactive: true,
            cleanup: true,
            email: None,
            disabled_backends: Vec::new(),
            flatpak_user: true,
            reboot_marker: PathBuf::from(DEFAULT_REBOOT_MARKER),
        }
    }
}

impl MaintenanceConfig {
    /// Load `explicit` (which must exist), else the system config file when
    /// present, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_from(explicit, Path::new(DEFAULT_CONFIG_PATH))
    }

    pub fn load_from(explicit: Option<&Path>, default_path: &Path) -> Result<Self> {
        let path = match explicit {
            Some(path) if !path.is_file() => {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Some(path) => path,
            None if default_path.is_file() => default_path,
            None => {
                debug!("No configuration file, using defaults");
                return Ok(Self::default());
            }
        };

        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&text, path)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(text: &str, origin: &Path) -> Result<Self> {
        let config: Self = if text.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
                path: origin.to_path_buf(),
                source,
            })?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "command_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if let Some(email) = &self.email {
            let malformed = !email.contains('@')
                || email.trim() != email
                || email.chars().any(char::is_control);
            if malformed {
                return Err(ConfigError::InvalidValue {
                    field: "email",
                    reason: format!("{email:?} is not a mail address"),
                });
            }
        }
        if let Some(label) = self
            .disabled_backends
            .iter()
            .find(|label| !is_adapter_label(label))
        {
            return Err(ConfigError::InvalidValue {
                field: "disabled_backends",
                reason: format!(
                    "unknown backend '{label}', expected one of {}",
                    ADAPTER_LABELS.join(", ")
                ),
            });
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
