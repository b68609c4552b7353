//! DNF adapter for Fedora/RHEL systems
//!
//! DNF's own history is transaction-scoped, so this adapter only ever
//! applies and undoes whole transactions.

use crate::backends::{
    error::{BackendError, RevertError},
    parse::{parse_listing, ParseOutcome},
    runner::{CommandRunner, CommandSpec},
    BackendAdapter, BackendKind, PendingUnit, UnitChange,
};
use crate::history::TransactionRecord;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// `dnf check-update` exit status meaning "updates are available".
const UPDATES_AVAILABLE: i32 = 100;

pub struct DnfAdapter {
    runner: Arc<dyn CommandRunner>,
}

impl DnfAdapter {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn run_checked(&self, spec: CommandSpec) -> Result<String, BackendError> {
        let output = self.runner.run(&spec).await?;
        Ok(output.require_success(&spec)?.stdout)
    }

    async fn last_transaction_id(&self) -> Result<Option<u64>, BackendError> {
        let stdout = self
            .run_checked(CommandSpec::new("dnf").args(["-q", "history", "list"]))
            .await?;
        Ok(parse_last_transaction_id(&stdout))
    }
}

/// Parse `dnf check-update` output (`name.arch  version  repo`).
pub fn parse_check_update(text: &str) -> ParseOutcome<PendingUnit> {
    // Everything after "Obsoleting Packages" repeats names already listed.
    let relevant = text.split("Obsoleting Packages").next().unwrap_or_default();

    parse_listing(relevant, &["Last metadata expiration", "Security:"], |line| {
        if line.starts_with(char::is_whitespace) {
            return None;
        }
        let mut fields = line.split_whitespace();
        let id = fields.next()?;
        let version = fields.next()?;
        let _repo = fields.next()?;
        id.contains('.')
            .then(|| PendingUnit::new(id, format!("-> {version}")))
    })
}

/// Highest transaction id in `dnf history list` output.
///
/// Handles both the `ID | Command line | ...` table of dnf4 and the
/// space-separated columns of dnf5.
pub fn parse_last_transaction_id(text: &str) -> Option<u64> {
    text.lines()
        .filter_map(|line| {
            line.trim()
                .split(|c: char| c == '|' || c.is_whitespace())
                .next()
                .and_then(|first| first.parse::<u64>().ok())
        })
        .max()
}

#[async_trait]
impl BackendAdapter for DnfAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Dnf
    }

    fn label(&self) -> &str {
        "DNF"
    }

    fn is_bulk_only(&self) -> bool {
        true
    }

    async fn detect(&self) -> bool {
        self.runner.binary_available("dnf")
    }

    async fn list_pending(&self) -> Result<Vec<PendingUnit>, BackendError> {
        let spec = CommandSpec::new("dnf").args(["-q", "check-update"]);
        let output = self.runner.run(&spec).await?;
        match output.status {
            Some(0) => Ok(Vec::new()),
            Some(UPDATES_AVAILABLE) => Ok(parse_check_update(&output.stdout).or_empty(self.label())),
            _ => Err(output.into_failure(&spec)),
        }
    }

    async fn current_state(&self, unit: &str) -> Result<Option<String>, BackendError> {
        let spec = CommandSpec::new("rpm")
            .args(["-q", "--qf", "%{VERSION}-%{RELEASE}"])
            .arg(unit);
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Ok(None);
        }
        let version = output.stdout.trim();
        Ok((!version.is_empty()).then(|| version.to_string()))
    }

    async fn apply_units(&self, _units: &[String]) -> Result<(), BackendError> {
        Err(BackendError::Unsupported {
            backend: self.label().to_string(),
            operation: "per-package apply",
        })
    }

    async fn apply_bulk(&self) -> Result<Option<String>, BackendError> {
        let previous = self.last_transaction_id().await?;

        info!("DNF: upgrading all packages");
        self.run_checked(CommandSpec::new("dnf").args(["-y", "upgrade"]))
            .await?;

        let current = match self.last_transaction_id().await {
            Ok(current) => current,
            Err(e) => {
                warn!("DNF: upgrade finished but its transaction id is unknown: {}", e);
                return Ok(None);
            }
        };

        match current {
            Some(id) if current != previous => Ok(Some(id.to_string())),
            _ => {
                info!("DNF: nothing was upgraded");
                Ok(None)
            }
        }
    }

    async fn cleanup(&self, _recorded: &[UnitChange]) -> Result<(), BackendError> {
        let autoremove = self
            .run_checked(CommandSpec::new("dnf").args(["-y", "autoremove"]))
            .await;
        let clean = self
            .run_checked(CommandSpec::new("dnf").args(["clean", "packages"]))
            .await;
        autoremove?;
        clean?;
        Ok(())
    }

    async fn revert(&self, record: &TransactionRecord) -> Result<(), RevertError> {
        if !record.is_bulk() {
            return Err(RevertError::UnsupportedGranularity {
                unit: record.unit.clone(),
            });
        }

        info!("DNF: undoing transaction {}", record.before);
        let spec = CommandSpec::new("dnf")
            .args(["-y", "history", "undo"])
            .arg(&record.before);
        self.run_checked(spec).await?;
        Ok(())
    }
}
