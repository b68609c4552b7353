//! Rollback engine
//!
//! Replays one batch from the history store in reverse append order and
//! asks each record's adapter to undo it. Every record is attempted;
//! the outcome is a tally, not a single pass/fail.

use crate::backends::{BackendKind, BackendRegistry, RevertError};
use crate::config::ConfigError;
use crate::history::{HistoryError, HistoryStore, TransactionRecord};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};

pub const LATEST: &str = "latest";

/// Which batch to undo, and from which history source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchSelector {
    /// Most recent batch in the default history store.
    Latest,
    /// A named batch in the default history store.
    Batch(String),
    /// Most recent batch in another history file.
    File(PathBuf),
}

impl BatchSelector {
    /// Interpret a `--rollback` argument.
    ///
    /// Anything containing a path separator, or naming an existing file, is
    /// a history file; such a file must exist.
    pub fn parse(arg: &str) -> Result<Self, ConfigError> {
        let arg = arg.trim();
        if arg.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "rollback",
                reason: "expected 'latest', a batch id or a history file".to_string(),
            });
        }
        if arg == LATEST {
            return Ok(BatchSelector::Latest);
        }

        let path = Path::new(arg);
        if arg.contains('/') || path.is_file() {
            if !path.is_file() {
                return Err(ConfigError::RollbackSourceMissing {
                    path: path.to_path_buf(),
                });
            }
            return Ok(BatchSelector::File(path.to_path_buf()));
        }

        Ok(BatchSelector::Batch(arg.to_string()))
    }
}

impl fmt::Display for BatchSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchSelector::Latest => f.write_str(LATEST),
            BatchSelector::Batch(id) => f.write_str(id),
            BatchSelector::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("History source not found: {0}")]
    SourceMissing(PathBuf),

    #[error(transparent)]
    History(#[from] HistoryError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "error", rename_all = "snake_case")]
pub enum RevertOutcome {
    Reverted,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordOutcome {
    pub backend: BackendKind,
    pub unit: String,
    pub before: String,
    pub outcome: RevertOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackSummary {
    /// `None` when the history source held no batch at all.
    pub batch_id: Option<String>,
    pub succeeded: usize,
    pub failed: usize,
    /// Unreadable lines belonging to the batch.
    pub skipped: usize,
    /// In the order the records were processed.
    pub outcomes: Vec<RecordOutcome>,
}

impl RollbackSummary {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

pub struct RollbackEngine<'a> {
    registry: &'a BackendRegistry,
    default_history: HistoryStore,
}

impl<'a> RollbackEngine<'a> {
    pub fn new(registry: &'a BackendRegistry, default_history: HistoryStore) -> Self {
        Self {
            registry,
            default_history,
        }
    }

    /// Resolve `selector` to a history source and a batch id.
    pub fn resolve(&self, selector: &BatchSelector) -> Result<(HistoryStore, Option<String>), RollbackError> {
        match selector {
            BatchSelector::Latest => {
                let batch = self.default_history.latest_batch()?;
                Ok((self.default_history.clone(), batch))
            }
            BatchSelector::Batch(id) => Ok((self.default_history.clone(), Some(id.clone()))),
            BatchSelector::File(path) => {
                let store = HistoryStore::open_existing(path).map_err(|e| match e {
                    HistoryError::SourceNotFound { path } => RollbackError::SourceMissing(path),
                    other => RollbackError::History(other),
                })?;
                let batch = store.latest_batch()?;
                Ok((store, batch))
            }
        }
    }

    pub async fn rollback(&self, selector: &BatchSelector) -> Result<RollbackSummary, RollbackError> {
        let (store, batch) = self.resolve(selector)?;
        let Some(batch_id) = batch else {
            info!("No batch found in {}, nothing to roll back", store.path().display());
            return Ok(RollbackSummary::default());
        };

        info!("Rolling back batch {} from {}", batch_id, store.path().display());
        let mut summary = RollbackSummary {
            batch_id: Some(batch_id.clone()),
            ..RollbackSummary::default()
        };

        for entry in store.scan_reverse(Some(&batch_id))? {
            let record = match entry {
                Ok(record) => record,
                Err(e) if e.is_line_error() => {
                    warn!("Skipping unreadable record in batch {}: {}", batch_id, e);
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let outcome = match self.revert(&record).await {
                Ok(()) => {
                    info!("Reverted {} {} to {}", record.backend, record.unit, record.before);
                    summary.succeeded += 1;
                    RevertOutcome::Reverted
                }
                Err(e) => {
                    error!("Could not revert {} {}: {}", record.backend, record.unit, e);
                    summary.failed += 1;
                    RevertOutcome::Failed(e.to_string())
                }
            };

            summary.outcomes.push(RecordOutcome {
                backend: record.backend,
                unit: record.unit,
                before: record.before,
                outcome,
            });
        }

        if summary.outcomes.is_empty() && summary.skipped == 0 {
            warn!(
                "Batch {} has no records in {}; check the batch id",
                batch_id,
                store.path().display()
            );
        }

        info!(
            "Rollback of {} finished: {} succeeded, {} failed, {} skipped",
            batch_id, summary.succeeded, summary.failed, summary.skipped
        );
        Ok(summary)
    }

    async fn revert(&self, record: &TransactionRecord) -> Result<(), RevertError> {
        let adapter = self
            .registry
            .for_revert(record.backend)
            .ok_or(RevertError::NoAdapter {
                backend: record.backend,
            })?;
        adapter.revert(record).await
    }
}
