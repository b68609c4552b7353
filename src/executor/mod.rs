//! Batch executor: DETECT -> FETCH -> SELECT -> APPLY -> CLEANUP -> REPORT
//!
//! A failure inside one backend is isolated to that backend's report
//! section. Only conditions that keep every backend from running end the
//! run early.

pub mod context;
pub mod error;
pub mod selection;

pub use context::*;
pub use error::ExecutorError;
pub use selection::*;

use crate::backends::{BackendAdapter, BackendRegistry};
use crate::history::{HistoryStore, TransactionRecord, BULK_TRANSACTION};
use crate::report::{ApplyMode, CleanupStatus, RunReport};
use crate::system::{RebootProbe, RebootStatus};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub type Result<T> = std::result::Result<T, ExecutorError>;

#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunReport),
    /// The operator cancelled at SELECT; nothing was applied.
    Cancelled { batch_id: String },
}

pub struct BatchExecutor {
    registry: BackendRegistry,
    history: HistoryStore,
    selector: Arc<dyn UnitSelector>,
    reboot: Option<RebootProbe>,
    cleanup: bool,
    host: String,
}

impl BatchExecutor {
    pub fn new(registry: BackendRegistry, history: HistoryStore) -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());

        Self {
            registry,
            history,
            selector: Arc::new(SelectAll),
            reboot: None,
            cleanup: true,
            host,
        }
    }

    pub fn with_selector(mut self, selector: Arc<dyn UnitSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_reboot_probe(mut self, probe: RebootProbe) -> Self {
        self.reboot = Some(probe);
        self
    }

    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub async fn run(&self) -> Result<RunOutcome> {
        let mut ctx = RunContext::new(Utc::now());
        info!("Starting maintenance run {}", ctx.batch_id);

        self.detect(&mut ctx).await;
        if ctx.backends.is_empty() {
            return Err(ExecutorError::NoActiveBackends);
        }
        self.history.ensure_writable()?;

        self.fetch(&mut ctx).await;

        if !self.select(&mut ctx).await {
            info!("Batch {}: cancelled by operator, nothing applied", ctx.batch_id);
            return Ok(RunOutcome::Cancelled {
                batch_id: ctx.batch_id,
            });
        }

        self.apply(&mut ctx).await;

        if self.cleanup {
            self.cleanup(&mut ctx).await;
        }

        ctx.enter(RunPhase::Report);
        let reboot = match &self.reboot {
            Some(probe) => probe.probe().await,
            None => RebootStatus::Unknown {
                reason: "not checked".to_string(),
            },
        };
        let report = ctx.into_report(self.host.clone(), reboot);
        info!(
            "Batch {}: finished, {} record(s) written",
            report.batch_id, report.records_written
        );
        Ok(RunOutcome::Completed(report))
    }

    fn adapter(&self, run: &BackendRun) -> Option<&dyn BackendAdapter> {
        self.registry.get(run.index)
    }

    async fn detect(&self, ctx: &mut RunContext) {
        ctx.enter(RunPhase::Detect);
        for (index, adapter) in self.registry.adapters().iter().enumerate() {
            if adapter.detect().await {
                info!("{}: detected", adapter.label());
                ctx.activate(index, adapter.label(), adapter.kind());
            } else {
                debug!("{}: not present on this host", adapter.label());
            }
        }
    }

    async fn fetch(&self, ctx: &mut RunContext) {
        ctx.enter(RunPhase::Fetch);
        for run in &mut ctx.backends {
            let Some(adapter) = self.adapter(run) else {
                continue;
            };

            if let Err(e) = adapter.refresh().await {
                warn!("{}: metadata refresh failed: {}", adapter.label(), e);
                run.section.warnings.push(format!("metadata refresh failed: {e}"));
            }

            match adapter.list_pending().await {
                Ok(pending) => {
                    info!("{}: {} pending update(s)", adapter.label(), pending.len());
                    run.section.pending = pending;
                }
                Err(e) => {
                    warn!("{}: could not list pending updates, assuming none: {}", adapter.label(), e);
                    run.section.warnings.push(format!("listing failed: {e}"));
                }
            }
        }
    }

    /// Returns false when the operator cancelled.
    async fn select(&self, ctx: &mut RunContext) -> bool {
        ctx.enter(RunPhase::Select);

        let selection = if ctx.total_pending() == 0 {
            Selection::All
        } else {
            let entries = ctx.pending_entries();
            let selector = Arc::clone(&self.selector);
            match tokio::task::spawn_blocking(move || selector.select(&entries)).await {
                Ok(selection) => selection,
                Err(e) => {
                    warn!("Selection prompt failed, selecting everything: {}", e);
                    Selection::Unavailable
                }
            }
        };

        if selection == Selection::Cancelled {
            return false;
        }

        for run in &mut ctx.backends {
            let Some(adapter) = self.adapter(run) else {
                continue;
            };
            let label = run.section.label.clone();
            let chosen: Vec<String> = run
                .section
                .pending
                .iter()
                .filter(|unit| selection.includes(&label, &unit.id))
                .map(|unit| unit.id.clone())
                .collect();

            if adapter.is_bulk_only() {
                if !run.section.pending.is_empty() && chosen.is_empty() {
                    info!("{}: all updates deselected, skipping", label);
                    run.section.mode = ApplyMode::Skipped;
                    continue;
                }
                if chosen.len() < run.section.pending.len() {
                    warn!("{}: applies updates in bulk; partial selection ignored", label);
                    run.section
                        .warnings
                        .push("partial selection ignored, bulk upgrade applied".to_string());
                }
                run.section.mode = ApplyMode::Bulk;
            } else if chosen.is_empty() {
                run.section.mode = ApplyMode::Skipped;
            } else {
                run.section.mode = ApplyMode::Units;
                run.units = chosen;
            }
        }

        true
    }

    async fn apply(&self, ctx: &mut RunContext) {
        ctx.enter(RunPhase::Apply);
        let RunContext {
            batch_id,
            backends,
            clock,
            records_written,
            ..
        } = ctx;

        for run in backends.iter_mut() {
            let Some(adapter) = self.adapter(run) else {
                continue;
            };
            let bulk = match run.section.mode {
                ApplyMode::Skipped => continue,
                ApplyMode::Bulk => true,
                ApplyMode::Units => false,
            };

            let result = match adapter.apply(&run.units, bulk).await {
                Ok(result) => result,
                Err(e) => {
                    error!("{}: apply failed: {}", adapter.label(), e);
                    run.section.errors.push(format!("apply failed: {e}"));
                    continue;
                }
            };

            let mut records = Vec::new();
            for change in result.changes {
                if change.changed() {
                    records.push(TransactionRecord::update(
                        clock.next(),
                        batch_id.as_str(),
                        adapter.kind(),
                        &change.unit,
                        &change.before,
                        &change.after,
                    ));
                    run.section.applied.push(change);
                } else {
                    debug!("{}: {} unchanged", adapter.label(), change.unit);
                    run.section.unchanged.push(change.unit);
                }
            }

            if let Some(transaction) = result.bulk_transaction {
                records.push(TransactionRecord::update(
                    clock.next(),
                    batch_id.as_str(),
                    adapter.kind(),
                    BULK_TRANSACTION,
                    &transaction,
                    &transaction,
                ));
                run.section.bulk_transaction = Some(transaction);
            }

            if let Some(failure) = result.failure {
                error!("{}: apply failed: {}", adapter.label(), failure);
                run.section.errors.push(format!("apply failed: {failure}"));
            }

            for record in records {
                match self.history.append(&record) {
                    Ok(()) => *records_written += 1,
                    Err(e) => {
                        error!("{}: history record for {} not written: {}", adapter.label(), record.unit, e);
                        run.section
                            .errors
                            .push(format!("history record for {} not written: {e}", record.unit));
                    }
                }
            }
        }
    }

    async fn cleanup(&self, ctx: &mut RunContext) {
        ctx.enter(RunPhase::Cleanup);
        for run in &mut ctx.backends {
            let Some(adapter) = self.adapter(run) else {
                continue;
            };
            match adapter.cleanup(&run.section.applied).await {
                Ok(()) => run.section.cleanup = CleanupStatus::Done,
                Err(e) => {
                    warn!("{}: cleanup failed: {}", adapter.label(), e);
                    run.section.cleanup = CleanupStatus::Failed(e.to_string());
                    run.section.errors.push(format!("cleanup failed: {e}"));
                }
            }
        }
    }
}
