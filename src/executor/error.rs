use crate::history::HistoryError;
use thiserror::Error;

/// Conditions that stop a run before any backend can do its work.
/// Per-backend failures never surface here; they end up in the report.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("No supported package manager was detected on this host")]
    NoActiveBackends,

    #[error("History store is not writable: {0}")]
    History(#[from] HistoryError),
}
