use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::path::Path;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use upkeep::backends::SystemCommandRunner;
use upkeep::cli::{execute, exit_code_for, prepare, UpkeepCli, EXIT_CONFIG_ERROR};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = UpkeepCli::parse();

    // Configuration problems are reported before logging exists.
    let prepared = match prepare(&cli) {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("upkeep: {e}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    if let Err(e) = init_tracing(cli.verbosity, &prepared.layout.run_log_path()) {
        eprintln!("upkeep: {e:#}");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    info!("Starting upkeep v{}", env!("CARGO_PKG_VERSION"));

    let runner = Arc::new(SystemCommandRunner::new(prepared.config.command_timeout()));
    match execute(&prepared, runner).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Console output on stderr, plus the verbose run log in the log directory.
fn init_tracing(verbosity: u8, run_log: &Path) -> Result<()> {
    let console_level = match verbosity {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let file = File::create(run_log)
        .with_context(|| format!("Failed to create run log {}", run_log.display()))?;

    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_level);
    let run_log = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_filter(LevelFilter::DEBUG);

    tracing_subscriber::registry()
        .with(console)
        .with(run_log)
        .try_init()
        .context("Failed to initialise logging")?;
    Ok(())
}
