use crate::backends::{BackendRegistry, CommandRunner, RegistryOptions};
use crate::cli::options::UpkeepCli;
use crate::cli::output::{print_cancelled, print_rollback_summary, print_run_report};
use crate::config::{ConfigError, LogLayout, MaintenanceConfig};
use crate::executor::{BatchExecutor, PromptSelector, RunOutcome, SelectAll, UnitSelector};
use crate::history::HistoryStore;
use crate::report::{send_report, RunReport};
use crate::rollback::{BatchSelector, RollbackEngine, RollbackError, RollbackSummary};
use crate::system::{warn_if_unprivileged, RebootProbe};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Exit status for configuration and argument problems.
pub const EXIT_CONFIG_ERROR: u8 = 2;
/// Exit status for any other fatal error.
pub const EXIT_FAILURE: u8 = 1;

/// Everything settled before any backend is touched.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub config: MaintenanceConfig,
    pub layout: LogLayout,
    pub rollback: Option<BatchSelector>,
}

/// Load configuration, apply command-line overrides and pick the log
/// directory. Every error here is a [`ConfigError`].
pub fn prepare(cli: &UpkeepCli) -> std::result::Result<Prepared, ConfigError> {
    let mut config = MaintenanceConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    let rollback = cli
        .rollback
        .as_deref()
        .map(BatchSelector::parse)
        .transpose()?;
    let layout = LogLayout::resolve(config.log_dir.as_deref())?;

    Ok(Prepared {
        config,
        layout,
        rollback,
    })
}

/// Map a fatal error to the process exit status.
pub fn exit_code_for(error: &anyhow::Error) -> u8 {
    if error.chain().any(|cause| cause.is::<ConfigError>()) {
        EXIT_CONFIG_ERROR
    } else {
        EXIT_FAILURE
    }
}

pub async fn execute(prepared: &Prepared, runner: Arc<dyn CommandRunner>) -> Result<()> {
    info!("Using log directory {}", prepared.layout.root().display());
    match &prepared.rollback {
        Some(selector) => {
            run_rollback(selector, &prepared.layout, runner).await?;
        }
        None => {
            run_update(&prepared.config, &prepared.layout, runner).await?;
        }
    }
    Ok(())
}

/// One maintenance run. A cancelled run is a success.
pub async fn run_update(
    config: &MaintenanceConfig,
    layout: &LogLayout,
    runner: Arc<dyn CommandRunner>,
) -> Result<Option<RunReport>> {
    warn_if_unprivileged();

    let options = RegistryOptions {
        flatpak_user: config.flatpak_user,
        disabled: config.disabled_backends.clone(),
    };
    let registry = BackendRegistry::standard(runner.clone(), &options);
    let selector: Arc<dyn UnitSelector> = if config.interactive {
        Arc::new(PromptSelector)
    } else {
        Arc::new(SelectAll)
    };

    let executor = BatchExecutor::new(registry, HistoryStore::open(layout.history_path()))
        .with_selector(selector)
        .with_cleanup(config.cleanup)
        .with_reboot_probe(RebootProbe::new(runner.clone(), &config.reboot_marker));

    let report = match executor.run().await.context("Maintenance run failed")? {
        RunOutcome::Cancelled { batch_id } => {
            print_cancelled(&batch_id);
            return Ok(None);
        }
        RunOutcome::Completed(report) => report,
    };

    if let Err(e) = report.write(layout) {
        warn!("Could not write report to {}: {}", layout.root().display(), e);
    }
    print_run_report(&report);

    if let Some(recipient) = &config.email {
        send_report(runner.as_ref(), &report, recipient).await;
    }

    Ok(Some(report))
}

/// Undo one batch. Individual revert failures are part of the summary, not
/// an error.
pub async fn run_rollback(
    selector: &BatchSelector,
    layout: &LogLayout,
    runner: Arc<dyn CommandRunner>,
) -> Result<RollbackSummary> {
    warn_if_unprivileged();

    // Every backend that could have written a record, regardless of what is
    // disabled for update runs.
    let registry = BackendRegistry::standard(runner, &RegistryOptions::default());
    let engine = RollbackEngine::new(&registry, HistoryStore::open(layout.history_path()));

    let summary = engine.rollback(selector).await.map_err(|e| match e {
        RollbackError::SourceMissing(path) => {
            anyhow::Error::from(ConfigError::RollbackSourceMissing { path })
        }
        other => anyhow::Error::from(other).context(format!("Rollback of {selector} failed")),
    })?;

    print_rollback_summary(&summary);
    Ok(summary)
}
