use crate::backends::BackendKind;
use thiserror::Error;

/// Failures while driving a package manager's own tooling
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command timed out after {seconds}s: {command}")]
    Timeout { command: String, seconds: u64 },

    #[error("Command failed ({}): {command}: {stderr}", describe_code(*code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{backend} does not support {operation}")]
    Unsupported {
        backend: String,
        operation: &'static str,
    },
}

fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// Per-record rollback failures. None of these abort a rollback run.
#[derive(Error, Debug)]
pub enum RevertError {
    #[error("Version {version} of {unit} is no longer available")]
    VersionUnavailable { unit: String, version: String },

    #[error("Commit {commit} of {unit} can no longer be located")]
    CommitUnavailable { unit: String, commit: String },

    #[error("{unit} has no prior revision to revert to")]
    NoPriorRevision { unit: String },

    #[error("Per-unit rollback of {unit} is not supported; only whole transactions can be undone")]
    UnsupportedGranularity { unit: String },

    #[error("No adapter registered for backend {backend}")]
    NoAdapter { backend: BackendKind },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}
