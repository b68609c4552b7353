use crate::config::MaintenanceConfig;
use clap::Parser;
use std::path::PathBuf;

/// upkeep command-line interface
#[derive(Parser, Debug)]
#[command(name = "upkeep")]
#[command(about = "Update APT, DNF, Flatpak and Snap packages in one run, with rollback")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct UpkeepCli {
    /// Undo a previous run: 'latest', a batch id, or a history file
    #[arg(long, value_name = "BATCH|latest|FILE")]
    pub rollback: Option<String>,

    /// Mail the run report to this address
    #[arg(long, value_name = "ADDRESS")]
    pub email: Option<String>,

    /// Directory for the history, run log and reports
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Configuration file (default: /etc/upkeep/config.yaml when present)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Apply every pending update without prompting
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Skip removal of unused packages and caches
    #[arg(long)]
    pub no_cleanup: bool,

    /// Timeout for each package manager command, in seconds
    #[arg(long, value_name = "SECONDS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Increase console verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

impl UpkeepCli {
    /// Command-line values take precedence over the configuration file.
    pub fn apply_overrides(&self, config: &mut MaintenanceConfig) {
        if let Some(dir) = &self.log_dir {
            config.log_dir = Some(dir.clone());
        }
        if let Some(email) = &self.email {
            config.email = Some(email.clone());
        }
        if let Some(timeout) = self.timeout {
            config.command_timeout_secs = timeout;
        }
        if self.yes {
            config.interactive = false;
        }
        if self.no_cleanup {
            config.cleanup = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win_over_file() {
        let cli = UpkeepCli::try_parse_from([
            "upkeep",
            "--email",
            "root@example.com",
            "--timeout",
            "120",
            "--yes",
            "--no-cleanup",
            "-vv",
        ])
        .unwrap();
        let mut config = MaintenanceConfig {
            email: Some("ops@example.com".to_string()),
            ..MaintenanceConfig::default()
        };
        cli.apply_overrides(&mut config);

        assert_eq!(config.email.as_deref(), Some("root@example.com"));
        assert_eq!(config.command_timeout_secs, 120);
        assert!(!config.interactive);
        assert!(!config.cleanup);
        assert_eq!(cli.verbosity, 2);
    }

    #[test]
    fn test_rollback_argument() {
        let cli = UpkeepCli::try_parse_from(["upkeep", "--rollback", "latest"]).unwrap();
        assert_eq!(cli.rollback.as_deref(), Some("latest"));
        assert!(UpkeepCli::try_parse_from(["upkeep", "--timeout", "0"]).is_err());
        assert!(UpkeepCli::try_parse_from(["upkeep", "--bogus"]).is_err());
    }
}
