//! Transaction records and their single-line encoding
//!
//! One record is written per affected unit per batch:
//!
//! ```text
//! timestamp|batchId|backend|unit|action|before|after
//! ```
//!
//! The field order and the backend names are stable; the rollback engine
//! must be able to read lines written by any earlier release.

use crate::backends::BackendKind;
use crate::history::error::HistoryError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Field delimiter of the history line format.
pub const FIELD_DELIMITER: char = '|';

/// Unit value for records covering a whole-backend operation.
pub const BULK_TRANSACTION: &str = "BULK_TRANSACTION";

/// `before` value for a unit that did not exist prior to the batch.
pub const FRESH_INSTALL: &str = "NONE";

const FIELD_COUNT: usize = 7;

/// What happened to the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Update,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Update => "UPDATE",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = HistoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UPDATE" => Ok(Action::Update),
            other => Err(HistoryError::UnknownAction(other.to_string())),
        }
    }
}

/// One durable history entry. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub timestamp: DateTime<Utc>,
    pub batch_id: String,
    pub backend: BackendKind,
    pub unit: String,
    pub action: Action,
    /// Backend-specific state needed to reverse the action.
    pub before: String,
    /// Backend-specific resulting state, kept for audit.
    pub after: String,
}

impl TransactionRecord {
    pub fn update(
        timestamp: DateTime<Utc>,
        batch_id: impl Into<String>,
        backend: BackendKind,
        unit: impl Into<String>,
        before: impl Into<String>,
        after: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            batch_id: batch_id.into(),
            backend,
            unit: unit.into(),
            action: Action::Update,
            before: before.into(),
            after: after.into(),
        }
    }

    /// True when this record stands for a whole-backend transaction.
    pub fn is_bulk(&self) -> bool {
        self.unit == BULK_TRANSACTION
    }

    /// True when the unit was freshly installed by the batch.
    pub fn is_fresh_install(&self) -> bool {
        self.before == FRESH_INSTALL
    }

    /// Encode as one history line, without the trailing newline.
    pub fn encode(&self) -> String {
        let timestamp = self
            .timestamp
            .to_rfc3339_opts(SecondsFormat::AutoSi, true);
        let fields = [
            timestamp.as_str(),
            self.batch_id.as_str(),
            self.backend.as_str(),
            self.unit.as_str(),
            self.action.as_str(),
            self.before.as_str(),
            self.after.as_str(),
        ];

        fields
            .iter()
            .map(|field| escape_field(field))
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Parse one history line. A trailing line terminator is ignored.
    pub fn parse(line: &str) -> Result<Self, HistoryError> {
        let line = line.trim_end_matches(['\n', '\r']);
        let fields = split_fields(line)?;
        if fields.len() != FIELD_COUNT {
            return Err(HistoryError::Malformed {
                line: line.to_string(),
                reason: format!("expected {FIELD_COUNT} fields, found {}", fields.len()),
            });
        }

        let timestamp = DateTime::parse_from_rfc3339(fields[0].trim())
            .map_err(|e| HistoryError::InvalidTimestamp {
                value: fields[0].clone(),
                reason: e.to_string(),
            })?
            .with_timezone(&Utc);

        let mut fields = fields.into_iter().skip(1);
        let mut next = || fields.next().unwrap_or_default();

        let batch_id = next();
        let backend_name = next();
        let backend = BackendKind::from_name(&backend_name)
            .ok_or(HistoryError::UnknownBackend(backend_name))?;
        let unit = next();
        let action = next().parse::<Action>()?;
        let before = next();
        let after = next();

        if batch_id.is_empty() {
            return Err(HistoryError::Malformed {
                line: line.to_string(),
                reason: "empty batch id".to_string(),
            });
        }

        Ok(Self {
            timestamp,
            batch_id,
            backend,
            unit,
            action,
            before,
            after,
        })
    }
}

impl fmt::Display for TransactionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} ({} -> {})",
            self.backend, self.action, self.unit, self.before, self.after
        )
    }
}

fn escape_field(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\|"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn split_fields(line: &str) -> Result<Vec<String>, HistoryError> {
    let mut fields = Vec::with_capacity(FIELD_COUNT);
    let mut current = String::new();
    let mut chars = line.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                let escaped = chars.next().ok_or_else(|| HistoryError::Malformed {
                    line: line.to_string(),
                    reason: "unterminated escape sequence".to_string(),
                })?;
                match escaped {
                    '\\' => current.push('\\'),
                    '|' => current.push('|'),
                    'n' => current.push('\n'),
                    'r' => current.push('\r'),
                    other => {
                        return Err(HistoryError::Malformed {
                            line: line.to_string(),
                            reason: format!("unsupported escape sequence: \\{other}"),
                        });
                    }
                }
            }
            FIELD_DELIMITER => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);

    Ok(fields)
}
