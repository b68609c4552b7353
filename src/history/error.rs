use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("I/O error on history file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed history line '{line}': {reason}")]
    Malformed { line: String, reason: String },

    #[error("Unknown backend in history: {0}")]
    UnknownBackend(String),

    #[error("Unknown action in history: {0}")]
    UnknownAction(String),

    #[error("Invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("History source not found: {path}")]
    SourceNotFound { path: PathBuf },
}

impl HistoryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HistoryError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors caused by one bad line rather than by the file itself.
    pub fn is_line_error(&self) -> bool {
        !matches!(
            self,
            HistoryError::Io { .. } | HistoryError::SourceNotFound { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, HistoryError>;
