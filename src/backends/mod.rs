//! Package manager adapters

use crate::history::{TransactionRecord, FRESH_INSTALL};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// `after` value when the post-apply state could not be read back.
pub const UNKNOWN_STATE: &str = "UNKNOWN";

/// Backend names as stored in history records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "APT")]
    Apt,
    #[serde(rename = "DNF")]
    Dnf,
    #[serde(rename = "FLATPAK")]
    Flatpak,
    #[serde(rename = "SNAP")]
    Snap,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Apt,
        BackendKind::Dnf,
        BackendKind::Flatpak,
        BackendKind::Snap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Apt => "APT",
            BackendKind::Dnf => "DNF",
            BackendKind::Flatpak => "FLATPAK",
            BackendKind::Snap => "SNAP",
        }
    }

    /// Exact, case-sensitive lookup of a stored backend name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit reported as having a newer version available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUnit {
    pub id: String,
    /// Free-form description, e.g. `1.0 -> 1.1`.
    pub descriptor: String,
}

impl PendingUnit {
    pub fn new(id: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            descriptor: descriptor.into(),
        }
    }
}

/// Observed state of one unit around an apply call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitChange {
    pub unit: String,
    pub before: String,
    pub after: String,
}

impl UnitChange {
    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

#[derive(Debug, Default)]
pub struct ApplyResult {
    /// Per-unit before/after pairs, in the order the units were requested.
    pub changes: Vec<UnitChange>,
    /// Backend-wide transaction identifier of a bulk apply that changed
    /// something.
    pub bulk_transaction: Option<String>,
    /// Set when the native apply reported failure. Changes captured
    /// afterwards are still valid and must be recorded.
    pub failure: Option<BackendError>,
}

/// One package manager, as seen by the executor and the rollback engine.
///
/// Calls against one adapter must not overlap; the native tools do not
/// support concurrent invocations of themselves.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Backend value written into history records.
    fn kind(&self) -> BackendKind;

    /// Instance label used in reports and configuration.
    fn label(&self) -> &str;

    /// Bulk-only backends are always applied as one whole-backend
    /// transaction.
    fn is_bulk_only(&self) -> bool {
        false
    }

    async fn detect(&self) -> bool;

    /// Refresh package metadata before listing.
    async fn refresh(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<PendingUnit>, BackendError>;

    /// Current installed state of `unit`, `None` when it is not installed.
    async fn current_state(&self, unit: &str) -> Result<Option<String>, BackendError>;

    async fn apply_units(&self, units: &[String]) -> Result<(), BackendError>;

    /// Update everything the backend manages. Returns the identifier of the
    /// transaction that did so, or `None` when nothing changed.
    async fn apply_bulk(&self) -> Result<Option<String>, BackendError> {
        Err(BackendError::Unsupported {
            backend: self.label().to_string(),
            operation: "bulk apply",
        })
    }

    /// Remove artifacts the backend no longer needs.
    ///
    /// `recorded` holds the changes this run wrote to history; anything
    /// their revert depends on must survive.
    async fn cleanup(&self, recorded: &[UnitChange]) -> Result<(), BackendError>;

    async fn revert(&self, record: &TransactionRecord) -> Result<(), RevertError>;

    /// Apply updates, capturing state immediately before and after.
    async fn apply(&self, units: &[String], bulk: bool) -> Result<ApplyResult, BackendError> {
        if bulk {
            let bulk_transaction = self.apply_bulk().await?;
            return Ok(ApplyResult {
                bulk_transaction,
                ..ApplyResult::default()
            });
        }

        let mut before = Vec::with_capacity(units.len());
        for unit in units {
            before.push(self.current_state(unit).await?);
        }

        let failure = self.apply_units(units).await.err();

        let mut changes = Vec::with_capacity(units.len());
        for (unit, before) in units.iter().zip(before) {
            let after = match self.current_state(unit).await {
                Ok(state) => state.unwrap_or_else(|| FRESH_INSTALL.to_string()),
                Err(e) => {
                    warn!("{}: could not read state of {} after apply: {}", self.label(), unit, e);
                    UNKNOWN_STATE.to_string()
                }
            };
            changes.push(UnitChange {
                unit: unit.clone(),
                before: before.unwrap_or_else(|| FRESH_INSTALL.to_string()),
                after,
            });
        }

        Ok(ApplyResult {
            changes,
            bulk_transaction: None,
            failure,
        })
    }
}

/// Labels of every adapter the standard registry can build.
pub const ADAPTER_LABELS: [&str; 5] = ["APT", "DNF", "FLATPAK_SYSTEM", "FLATPAK_USER", "SNAP"];

/// Whether `label` names a standard adapter, ignoring case.
pub fn is_adapter_label(label: &str) -> bool {
    ADAPTER_LABELS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(label))
}

/// Options for the standard adapter set.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub flatpak_user: bool,
    pub disabled: Vec<String>,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            flatpak_user: true,
            disabled: Vec::new(),
        }
    }
}

/// The adapters known to this process, in processing order.
pub struct BackendRegistry {
    adapters: Vec<Box<dyn BackendAdapter>>,
}

impl BackendRegistry {
    pub fn new(adapters: Vec<Box<dyn BackendAdapter>>) -> Self {
        Self { adapters }
    }

    /// APT, DNF, Flatpak (system, optionally user) and Snap, minus any
    /// disabled labels.
    pub fn standard(runner: Arc<dyn CommandRunner>, options: &RegistryOptions) -> Self {
        let mut adapters: Vec<Box<dyn BackendAdapter>> = vec![
            Box::new(AptAdapter::new(runner.clone())),
            Box::new(DnfAdapter::new(runner.clone())),
            Box::new(FlatpakAdapter::new(runner.clone(), FlatpakScope::System)),
        ];
        if options.flatpak_user {
            adapters.push(Box::new(FlatpakAdapter::new(
                runner.clone(),
                FlatpakScope::User,
            )));
        }
        adapters.push(Box::new(SnapAdapter::new(runner)));

        adapters.retain(|adapter| {
            !options
                .disabled
                .iter()
                .any(|label| label.eq_ignore_ascii_case(adapter.label()))
        });

        Self { adapters }
    }

    pub fn adapters(&self) -> &[Box<dyn BackendAdapter>] {
        &self.adapters
    }

    pub fn get(&self, index: usize) -> Option<&dyn BackendAdapter> {
        self.adapters.get(index).map(|adapter| adapter.as_ref())
    }

    /// Adapter able to revert records of `kind`.
    pub fn for_revert(&self, kind: BackendKind) -> Option<&dyn BackendAdapter> {
        self.adapters
            .iter()
            .find(|adapter| adapter.kind() == kind)
            .map(|adapter| adapter.as_ref())
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.adapters.iter().map(|adapter| adapter.label()))
            .finish()
    }
}

pub mod apt;
pub mod dnf;
pub mod error;
pub mod flatpak;
pub mod parse;
pub mod runner;
pub mod snap;

pub use apt::AptAdapter;
pub use dnf::DnfAdapter;
pub use error::{BackendError, RevertError};
pub use flatpak::{FlatpakAdapter, FlatpakScope};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, SystemCommandRunner};
pub use snap::SnapAdapter;
