//! upkeep - host maintenance across APT, DNF, Flatpak and Snap
//!
//! Discovers pending updates, applies them while recording enough history
//! to undo each batch, cleans up, checks whether a reboot is pending and
//! reports the result. A recorded batch can later be rolled back through
//! each package manager's own inverse operation.

pub mod backends;
pub mod cli;
pub mod config;
pub mod executor;
pub mod history;
pub mod report;
pub mod rollback;
pub mod system;

pub use backends::{BackendAdapter, BackendKind, BackendRegistry};
pub use executor::{BatchExecutor, RunOutcome};
pub use history::{HistoryStore, TransactionRecord};
pub use rollback::{BatchSelector, RollbackEngine, RollbackSummary};
