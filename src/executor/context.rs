//! Per-run state carried from DETECT to REPORT

use crate::backends::{BackendKind, PendingUnit};
use crate::executor::selection::PendingEntry;
use crate::report::{BackendSection, RunReport};
use crate::system::RebootStatus;
use chrono::{DateTime, Utc};
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Detect,
    Fetch,
    Select,
    Apply,
    Cleanup,
    Report,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Detect => "DETECT",
            RunPhase::Fetch => "FETCH",
            RunPhase::Select => "SELECT",
            RunPhase::Apply => "APPLY",
            RunPhase::Cleanup => "CLEANUP",
            RunPhase::Report => "REPORT",
        };
        f.write_str(name)
    }
}

/// `20240502T090000.123Z-4242`: run start in UTC plus the process id.
pub fn new_batch_id(started_at: DateTime<Utc>) -> String {
    format!(
        "{}-{}",
        started_at.format("%Y%m%dT%H%M%S%.3fZ"),
        std::process::id()
    )
}

/// Hands out record timestamps that never go backwards within a batch,
/// even if the wall clock does.
#[derive(Debug, Clone)]
pub struct BatchClock {
    last: DateTime<Utc>,
}

impl BatchClock {
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self { last: start }
    }

    pub fn next(&mut self) -> DateTime<Utc> {
        self.next_after(Utc::now())
    }

    fn next_after(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.last = self.last.max(now);
        self.last
    }
}

/// One active backend's slice of the run.
#[derive(Debug, Clone)]
pub struct BackendRun {
    /// Position of the adapter in the registry.
    pub index: usize,
    /// Units scheduled for a per-unit apply.
    pub units: Vec<String>,
    pub section: BackendSection,
}

/// Everything one run accumulates. Owned by the executor for the duration
/// of `run`; nothing in here outlives it except the history it wrote.
#[derive(Debug)]
pub struct RunContext {
    pub batch_id: String,
    pub started_at: DateTime<Utc>,
    pub phase: RunPhase,
    pub backends: Vec<BackendRun>,
    pub clock: BatchClock,
    pub records_written: usize,
}

impl RunContext {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            batch_id: new_batch_id(started_at),
            started_at,
            phase: RunPhase::Detect,
            backends: Vec::new(),
            clock: BatchClock::starting_at(started_at),
            records_written: 0,
        }
    }

    pub fn enter(&mut self, phase: RunPhase) {
        self.phase = phase;
        info!("Batch {}: {} phase", self.batch_id, phase);
    }

    pub fn activate(&mut self, index: usize, label: &str, kind: BackendKind) {
        self.backends.push(BackendRun {
            index,
            units: Vec::new(),
            section: BackendSection::new(label, kind),
        });
    }

    pub fn total_pending(&self) -> usize {
        self.backends.iter().map(|run| run.section.pending.len()).sum()
    }

    /// Union of pending units across backends, in processing order.
    pub fn pending_entries(&self) -> Vec<PendingEntry> {
        self.backends
            .iter()
            .flat_map(|run| {
                run.section.pending.iter().map(|unit: &PendingUnit| PendingEntry {
                    label: run.section.label.clone(),
                    unit: unit.id.clone(),
                    descriptor: unit.descriptor.clone(),
                })
            })
            .collect()
    }

    pub fn into_report(self, host: String, reboot: RebootStatus) -> RunReport {
        RunReport {
            batch_id: self.batch_id,
            host,
            started_at: self.started_at,
            finished_at: Utc::now(),
            sections: self.backends.into_iter().map(|run| run.section).collect(),
            records_written: self.records_written,
            reboot,
        }
    }
}
