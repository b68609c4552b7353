//! Reboot-pending detection

use crate::backends::{CommandRunner, CommandSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_REBOOT_MARKER: &str = "/var/run/reboot-required";

/// `needs-restarting -r` exit status when a reboot is needed.
const NEEDS_RESTARTING_REBOOT: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RebootStatus {
    Required { reason: String },
    NotRequired,
    Unknown { reason: String },
}

impl RebootStatus {
    pub fn is_required(&self) -> bool {
        matches!(self, RebootStatus::Required { .. })
    }
}

impl fmt::Display for RebootStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebootStatus::Required { reason } => write!(f, "required ({reason})"),
            RebootStatus::NotRequired => f.write_str("not required"),
            RebootStatus::Unknown { reason } => write!(f, "unknown ({reason})"),
        }
    }
}

/// Checks the Debian marker file, then `needs-restarting` on RPM hosts.
pub struct RebootProbe {
    runner: Arc<dyn CommandRunner>,
    marker: PathBuf,
}

impl RebootProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, marker: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            marker: marker.into(),
        }
    }

    pub async fn probe(&self) -> RebootStatus {
        if self.marker.exists() {
            return RebootStatus::Required {
                reason: format!("{} is present", self.marker.display()),
            };
        }

        if !self.runner.binary_available("needs-restarting") {
            debug!("needs-restarting not available, relying on marker file only");
            return RebootStatus::NotRequired;
        }

        let spec = CommandSpec::new("needs-restarting").arg("-r");
        match self.runner.run(&spec).await {
            Ok(output) if output.status == Some(NEEDS_RESTARTING_REBOOT) => RebootStatus::Required {
                reason: "needs-restarting reports updated core components".to_string(),
            },
            Ok(output) if output.success() => RebootStatus::NotRequired,
            Ok(output) => {
                let reason = output.into_failure(&spec).to_string();
                warn!("Reboot probe failed: {}", reason);
                RebootStatus::Unknown { reason }
            }
            Err(e) => {
                warn!("Reboot probe failed: {}", e);
                RebootStatus::Unknown {
                    reason: e.to_string(),
                }
            }
        }
    }
}
