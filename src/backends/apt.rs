//! APT adapter for Debian/Ubuntu systems

use crate::backends::{
    error::{BackendError, RevertError},
    parse::{parse_listing, ParseOutcome},
    runner::{CommandRunner, CommandSpec},
    BackendAdapter, BackendKind, PendingUnit, UnitChange,
};
use crate::history::TransactionRecord;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

const UPGRADABLE_FROM: &str = "[upgradable from:";

pub struct AptAdapter {
    runner: Arc<dyn CommandRunner>,
}

impl AptAdapter {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn apt_get(&self) -> CommandSpec {
        CommandSpec::new("apt-get")
            .env("DEBIAN_FRONTEND", "noninteractive")
            .args(["-q", "-y"])
    }

    async fn run_checked(&self, spec: CommandSpec) -> Result<String, BackendError> {
        let output = self.runner.run(&spec).await?;
        Ok(output.require_success(&spec)?.stdout)
    }
}

/// Parse `apt list --upgradable` output.
pub fn parse_upgradable(text: &str) -> ParseOutcome<PendingUnit> {
    parse_listing(text, &["Listing", "WARNING", "N:"], parse_upgradable_line)
}

// curl/jammy-updates 7.81.0-1ubuntu1.15 amd64 [upgradable from: 7.81.0-1ubuntu1.14]
fn parse_upgradable_line(line: &str) -> Option<PendingUnit> {
    let (head, tail) = line.trim().split_once(UPGRADABLE_FROM)?;
    let old = tail.trim().strip_suffix(']')?.trim();

    let mut fields = head.split_whitespace();
    let (name, _suite) = fields.next()?.split_once('/')?;
    let new = fields.next()?;

    if name.is_empty() || old.is_empty() {
        return None;
    }
    Some(PendingUnit::new(name, format!("{old} -> {new}")))
}

/// Parse `dpkg-query -W -f='${Status}|${Version}'` output.
pub fn parse_dpkg_status(text: &str) -> Option<String> {
    let (status, version) = text.trim().split_once('|')?;
    let installed = status.split_whitespace().last() == Some("installed")
        && !status.contains("not-installed");
    (installed && !version.is_empty()).then(|| version.to_string())
}

fn is_version_unavailable(stderr: &str) -> bool {
    stderr.contains("Version '") && stderr.contains("was not found")
}

#[async_trait]
impl BackendAdapter for AptAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Apt
    }

    fn label(&self) -> &str {
        "APT"
    }

    async fn detect(&self) -> bool {
        self.runner.binary_available("apt-get") && self.runner.binary_available("dpkg-query")
    }

    async fn refresh(&self) -> Result<(), BackendError> {
        self.run_checked(self.apt_get().arg("update")).await?;
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<PendingUnit>, BackendError> {
        let spec = CommandSpec::new("apt")
            .env("LC_ALL", "C")
            .args(["list", "--upgradable"]);
        let stdout = self.run_checked(spec).await?;
        Ok(parse_upgradable(&stdout).or_empty(self.label()))
    }

    async fn current_state(&self, unit: &str) -> Result<Option<String>, BackendError> {
        let spec = CommandSpec::new("dpkg-query")
            .args(["-W", "-f=${Status}|${Version}"])
            .arg(unit);
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            // dpkg-query exits 1 for packages it has never heard of.
            return Ok(None);
        }
        Ok(parse_dpkg_status(&output.stdout))
    }

    async fn apply_units(&self, units: &[String]) -> Result<(), BackendError> {
        if units.is_empty() {
            return Ok(());
        }
        info!("APT: upgrading {} package(s)", units.len());
        let spec = self
            .apt_get()
            .args(["install", "--only-upgrade", "-o", "Dpkg::Options::=--force-confold"])
            .args(units.iter().cloned());
        self.run_checked(spec).await?;
        Ok(())
    }

    async fn cleanup(&self, _recorded: &[UnitChange]) -> Result<(), BackendError> {
        let autoremove = self.run_checked(self.apt_get().arg("autoremove")).await;
        let autoclean = self.run_checked(self.apt_get().arg("autoclean")).await;
        autoremove?;
        autoclean?;
        Ok(())
    }

    async fn revert(&self, record: &TransactionRecord) -> Result<(), RevertError> {
        let spec = if record.is_fresh_install() {
            debug!("APT: {} was newly installed, removing it", record.unit);
            self.apt_get().arg("remove").arg(&record.unit)
        } else {
            self.apt_get()
                .args(["install", "--allow-downgrades"])
                .arg(format!("{}={}", record.unit, record.before))
        };

        let output = self.runner.run(&spec).await?;
        if output.success() {
            return Ok(());
        }
        if is_version_unavailable(&output.stderr) {
            return Err(RevertError::VersionUnavailable {
                unit: record.unit.clone(),
                version: record.before.clone(),
            });
        }
        Err(output.into_failure(&spec).into())
    }
}
