//! End-of-run report: what was pending, what was applied, what failed

pub mod mail;

pub use mail::*;

use crate::backends::{BackendKind, PendingUnit, UnitChange};
use crate::config::LogLayout;
use crate::system::RebootStatus;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::io;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Ok,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum CleanupStatus {
    NotRun,
    Done,
    Failed(String),
}

/// How a backend was scheduled after selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    Units,
    Bulk,
    Skipped,
}

/// One active backend's part of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSection {
    pub label: String,
    pub backend: BackendKind,
    pub mode: ApplyMode,
    /// Units listed at FETCH.
    pub pending: Vec<PendingUnit>,
    /// Units whose state changed at APPLY.
    pub applied: Vec<UnitChange>,
    /// Units applied without an observable state change.
    pub unchanged: Vec<String>,
    pub bulk_transaction: Option<String>,
    pub cleanup: CleanupStatus,
    /// Problems that did not mark the section as failed, e.g. a listing
    /// that could not be fetched.
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl BackendSection {
    pub fn new(label: impl Into<String>, backend: BackendKind) -> Self {
        Self {
            label: label.into(),
            backend,
            mode: ApplyMode::Skipped,
            pending: Vec::new(),
            applied: Vec::new(),
            unchanged: Vec::new(),
            bulk_transaction: None,
            cleanup: CleanupStatus::NotRun,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn status(&self) -> SectionStatus {
        if self.errors.is_empty() {
            SectionStatus::Ok
        } else {
            SectionStatus::Errored
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub batch_id: String,
    pub host: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sections: Vec<BackendSection>,
    pub records_written: usize,
    pub reboot: RebootStatus,
}

impl RunReport {
    pub fn has_errors(&self) -> bool {
        self.sections
            .iter()
            .any(|section| section.status() == SectionStatus::Errored)
    }

    pub fn subject(&self) -> String {
        let outcome = if self.has_errors() { "completed with errors" } else { "completed" };
        format!("[upkeep] {}: maintenance run {} {}", self.host, self.batch_id, outcome)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Maintenance report for {}", self.host);
        let _ = writeln!(out, "Batch:    {}", self.batch_id);
        let _ = writeln!(
            out,
            "Started:  {}",
            self.started_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let _ = writeln!(
            out,
            "Finished: {}",
            self.finished_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let _ = writeln!(out, "Records:  {}", self.records_written);
        let _ = writeln!(out, "Reboot:   {}", self.reboot);

        if self.sections.is_empty() {
            let _ = writeln!(out, "\nNo package managers were active.");
        }

        for section in &self.sections {
            let status = match section.status() {
                SectionStatus::Ok => "OK",
                SectionStatus::Errored => "ERRORS",
            };
            let _ = writeln!(out, "\n== {} [{}] ==", section.label, status);

            let _ = writeln!(out, "Pending ({}):", section.pending.len());
            for unit in &section.pending {
                let _ = writeln!(out, "  {} {}", unit.id, unit.descriptor);
            }

            match section.mode {
                ApplyMode::Skipped => {
                    let _ = writeln!(out, "Applied: nothing");
                }
                ApplyMode::Bulk => match &section.bulk_transaction {
                    Some(id) => {
                        let _ = writeln!(out, "Applied: bulk transaction {id}");
                    }
                    None => {
                        let _ = writeln!(out, "Applied: bulk upgrade, no transaction recorded");
                    }
                },
                ApplyMode::Units => {
                    let _ = writeln!(out, "Applied ({}):", section.applied.len());
                    for change in &section.applied {
                        let _ = writeln!(out, "  {} {} -> {}", change.unit, change.before, change.after);
                    }
                    if !section.unchanged.is_empty() {
                        let _ = writeln!(out, "Unchanged: {}", section.unchanged.join(", "));
                    }
                }
            }

            match &section.cleanup {
                CleanupStatus::NotRun => {}
                CleanupStatus::Done => {
                    let _ = writeln!(out, "Cleanup: done");
                }
                CleanupStatus::Failed(reason) => {
                    let _ = writeln!(out, "Cleanup: failed ({reason})");
                }
            }

            for warning in &section.warnings {
                let _ = writeln!(out, "Warning: {warning}");
            }
            for error in &section.errors {
                let _ = writeln!(out, "Error: {error}");
            }
        }

        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Replace the last-run report files in the log directory.
    pub fn write(&self, layout: &LogLayout) -> io::Result<()> {
        fs::create_dir_all(layout.root())?;
        fs::write(layout.report_path(), self.render_text())?;
        let json = self.to_json().map_err(io::Error::other)?;
        fs::write(layout.report_json_path(), json)?;
        info!("Report written to {}", layout.report_path().display());
        Ok(())
    }
}
