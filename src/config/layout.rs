//! Log directory selection and the files kept inside it

use crate::config::error::{ConfigError, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_LOG_DIR: &str = "/var/log/upkeep";

const APP_DIR: &str = "upkeep";

/// Paths of everything persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLayout {
    root: PathBuf,
}

impl LogLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Append-only transaction history.
    pub fn history_path(&self) -> PathBuf {
        self.root.join("transactions.log")
    }

    /// Verbose log of the current run.
    pub fn run_log_path(&self) -> PathBuf {
        self.root.join("upkeep.log")
    }

    pub fn report_path(&self) -> PathBuf {
        self.root.join("last-run-report.txt")
    }

    pub fn report_json_path(&self) -> PathBuf {
        self.root.join("last-run-report.json")
    }

    /// Pick the log directory for this host.
    ///
    /// An explicitly configured directory must be usable. Otherwise the
    /// system location is tried first, then the per-user state directory.
    pub fn resolve(configured: Option<&Path>) -> Result<Self> {
        Self::resolve_with(configured, Path::new(DEFAULT_LOG_DIR), user_log_dir())
    }

    pub fn resolve_with(
        configured: Option<&Path>,
        system_dir: &Path,
        user_dir: Option<PathBuf>,
    ) -> Result<Self> {
        if let Some(dir) = configured {
            ensure_usable(dir).map_err(|source| ConfigError::LogDirUnusable {
                path: dir.to_path_buf(),
                source,
            })?;
            return Ok(Self::new(dir));
        }

        let mut tried = Vec::new();
        let candidates = std::iter::once(system_dir.to_path_buf()).chain(user_dir);
        for dir in candidates {
            match ensure_usable(&dir) {
                Ok(()) => {
                    if !tried.is_empty() {
                        warn!("Using fallback log directory {}", dir.display());
                    }
                    return Ok(Self::new(dir));
                }
                Err(e) => {
                    debug!("Log directory {} is not usable: {}", dir.display(), e);
                    tried.push(dir);
                }
            }
        }

        Err(ConfigError::NoUsableLogDir { tried })
    }
}

/// Per-user fallback, e.g. `~/.local/state/upkeep`.
pub fn user_log_dir() -> Option<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|dir| dir.join(APP_DIR))
}

fn ensure_usable(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    // Creating a file is the only reliable writability check.
    tempfile::tempfile_in(dir)?;
    Ok(())
}
