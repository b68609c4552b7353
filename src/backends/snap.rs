//! Snap adapter

use crate::backends::{
    error::{BackendError, RevertError},
    parse::{parse_listing, ParseOutcome},
    runner::{CommandRunner, CommandSpec},
    BackendAdapter, BackendKind, PendingUnit, UnitChange,
};
use crate::history::TransactionRecord;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct SnapAdapter {
    runner: Arc<dyn CommandRunner>,
}

impl SnapAdapter {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn run_checked(&self, spec: CommandSpec) -> Result<String, BackendError> {
        let output = self.runner.run(&spec).await?;
        Ok(output.require_success(&spec)?.stdout)
    }
}

/// Parse `snap refresh --list` output.
pub fn parse_refresh_list(text: &str) -> ParseOutcome<PendingUnit> {
    if text.trim().starts_with("All snaps up to date") {
        return ParseOutcome::Parsed(Vec::new());
    }
    // Name  Version  Rev  Size  Publisher  Notes
    parse_listing(text, &["Name "], |line| {
        let mut fields = line.split_whitespace();
        let name = fields.next()?;
        let version = fields.next()?;
        let revision = fields.next()?;
        revision
            .parse::<u64>()
            .ok()
            .map(|_| PendingUnit::new(name, format!("-> {version} (rev {revision})")))
    })
}

/// A row of `snap list` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapListing {
    pub name: String,
    pub revision: String,
    pub disabled: bool,
}

/// Parse `snap list [--all]` output.
pub fn parse_snap_list(text: &str) -> Vec<SnapListing> {
    // Name  Version  Rev  Tracking  Publisher  Notes
    text.lines()
        .filter(|line| !line.starts_with("Name ") && !line.trim().is_empty())
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let name = fields.first()?;
            let revision = fields.get(2).filter(|rev| rev.parse::<u64>().is_ok())?;
            let disabled = fields
                .iter()
                .skip(3)
                .any(|notes| notes.split(',').any(|note| note == "disabled"));
            Some(SnapListing {
                name: name.to_string(),
                revision: revision.to_string(),
                disabled,
            })
        })
        .collect()
}

/// The disabled revision a recorded refresh of the same snap started from.
fn is_revert_target(snap: &SnapListing, recorded: &[UnitChange]) -> bool {
    recorded
        .iter()
        .any(|change| change.unit == snap.name && change.before == snap.revision)
}

fn is_no_prior_revision(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("no revision") || stderr.contains("nothing to revert")
}

#[async_trait]
impl BackendAdapter for SnapAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Snap
    }

    fn label(&self) -> &str {
        "SNAP"
    }

    async fn detect(&self) -> bool {
        self.runner.binary_available("snap")
    }

    async fn list_pending(&self) -> Result<Vec<PendingUnit>, BackendError> {
        let spec = CommandSpec::new("snap").args(["refresh", "--list"]);
        let output = self.runner.run(&spec).await?;
        // snapd reports "All snaps up to date." on stderr.
        if !output.success() {
            return Err(output.into_failure(&spec));
        }
        let text = if output.stdout.trim().is_empty() {
            &output.stderr
        } else {
            &output.stdout
        };
        Ok(parse_refresh_list(text).or_empty(self.label()))
    }

    async fn current_state(&self, unit: &str) -> Result<Option<String>, BackendError> {
        let spec = CommandSpec::new("snap").arg("list").arg(unit);
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Ok(None);
        }
        Ok(parse_snap_list(&output.stdout)
            .into_iter()
            .find(|snap| snap.name == unit)
            .map(|snap| snap.revision))
    }

    async fn apply_units(&self, units: &[String]) -> Result<(), BackendError> {
        if units.is_empty() {
            return Ok(());
        }
        info!("SNAP: refreshing {} snap(s)", units.len());
        let spec = CommandSpec::new("snap")
            .arg("refresh")
            .args(units.iter().cloned());
        self.run_checked(spec).await?;
        Ok(())
    }

    async fn cleanup(&self, recorded: &[UnitChange]) -> Result<(), BackendError> {
        let listing = self
            .run_checked(CommandSpec::new("snap").args(["list", "--all"]))
            .await?;

        let mut first_error = None;
        for snap in parse_snap_list(&listing).into_iter().filter(|s| s.disabled) {
            // `snap revert` goes back to this revision.
            if is_revert_target(&snap, recorded) {
                debug!("SNAP: keeping revision {} of {} for rollback", snap.revision, snap.name);
                continue;
            }
            let spec = CommandSpec::new("snap")
                .arg("remove")
                .arg(&snap.name)
                .arg(format!("--revision={}", snap.revision));
            if let Err(e) = self.run_checked(spec).await {
                warn!("SNAP: could not remove revision {} of {}: {}", snap.revision, snap.name, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn revert(&self, record: &TransactionRecord) -> Result<(), RevertError> {
        let spec = CommandSpec::new("snap").arg("revert").arg(&record.unit);
        let output = self.runner.run(&spec).await?;
        if output.success() {
            return Ok(());
        }
        if is_no_prior_revision(&output.stderr) {
            return Err(RevertError::NoPriorRevision {
                unit: record.unit.clone(),
            });
        }
        Err(output.into_failure(&spec).into())
    }
}
