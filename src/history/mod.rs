//! Durable transaction history: record model, line codec and the
//! append-only store the rollback engine replays.

pub mod error;
pub mod record;
pub mod store;

pub use error::HistoryError;
pub use record::*;
pub use store::*;
