//! Best-effort parsing of package-manager listings
//!
//! Parsers never fail hard: text they cannot make sense of becomes
//! [`ParseOutcome::Unparsable`] and the adapter falls back to an empty
//! listing.

use crate::backends::PendingUnit;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome<T> {
    Parsed(Vec<T>),
    Unparsable { reason: String },
}

impl<T> ParseOutcome<T> {
    /// Items on success, an empty list (with a warning) otherwise.
    pub fn or_empty(self, backend: &str) -> Vec<T> {
        match self {
            ParseOutcome::Parsed(items) => items,
            ParseOutcome::Unparsable { reason } => {
                warn!("Could not parse {} listing, assuming nothing pending: {}", backend, reason);
                Vec::new()
            }
        }
    }
}

/// Run `parse_line` over every meaningful line.
///
/// Output that has content but yields nothing recognisable is reported as
/// unparsable so a format change does not silently look like "up to date".
pub fn parse_listing<F>(text: &str, skip: &[&str], mut parse_line: F) -> ParseOutcome<PendingUnit>
where
    F: FnMut(&str) -> Option<PendingUnit>,
{
    let mut units = Vec::new();
    let mut unrecognised = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || skip.iter().any(|prefix| trimmed.starts_with(prefix)) {
            continue;
        }
        match parse_line(line) {
            Some(unit) => units.push(unit),
            None => unrecognised.push(trimmed.to_string()),
        }
    }

    if units.is_empty() && !unrecognised.is_empty() {
        return ParseOutcome::Unparsable {
            reason: format!(
                "{} unrecognised line(s), first: '{}'",
                unrecognised.len(),
                unrecognised[0]
            ),
        };
    }

    ParseOutcome::Parsed(units)
}
