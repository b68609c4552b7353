//! Operator selection of pending units

use std::collections::BTreeSet;
use std::io::{self, BufRead, IsTerminal, Write};

/// A pending unit as shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Adapter label, e.g. `FLATPAK_USER`.
    pub label: String,
    pub unit: String,
    pub descriptor: String,
}

impl PendingEntry {
    pub fn key(&self) -> (String, String) {
        (self.label.clone(), self.unit.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Apply everything that is pending.
    All,
    /// Apply only these `(label, unit)` pairs.
    Chosen(BTreeSet<(String, String)>),
    /// The operator backed out; nothing may be applied.
    Cancelled,
    /// No way to ask; treated like `All`.
    Unavailable,
}

impl Selection {
    pub fn includes(&self, label: &str, unit: &str) -> bool {
        match self {
            Selection::All | Selection::Unavailable => true,
            Selection::Chosen(chosen) => chosen.contains(&(label.to_string(), unit.to_string())),
            Selection::Cancelled => false,
        }
    }
}

/// Narrows the pending set before APPLY. Called on a blocking thread.
pub trait UnitSelector: Send + Sync {
    fn select(&self, entries: &[PendingEntry]) -> Selection;
}

/// Non-interactive selection.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectAll;

impl UnitSelector for SelectAll {
    fn select(&self, _entries: &[PendingEntry]) -> Selection {
        Selection::All
    }
}

/// Numbered checklist on the terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptSelector;

impl UnitSelector for PromptSelector {
    fn select(&self, entries: &[PendingEntry]) -> Selection {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            return Selection::Unavailable;
        }
        let mut input = stdin.lock();
        let mut output = io::stdout();
        prompt(entries, &mut input, &mut output).unwrap_or(Selection::Unavailable)
    }
}

/// Show `entries` and read which of them to skip.
///
/// An empty answer accepts everything, `q` cancels, otherwise the answer is
/// a list of numbers and `a-b` ranges to leave out. End of input cancels.
pub fn prompt<R: BufRead, W: Write>(
    entries: &[PendingEntry],
    input: &mut R,
    output: &mut W,
) -> io::Result<Selection> {
    writeln!(output, "Pending updates:")?;
    for (i, entry) in entries.iter().enumerate() {
        writeln!(
            output,
            "  {:>3}) [{}] {} {}",
            i + 1,
            entry.label,
            entry.unit,
            entry.descriptor
        )?;
    }

    loop {
        write!(output, "Numbers to skip (Enter = update all, q = cancel): ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(Selection::Cancelled);
        }
        let answer = line.trim();

        if answer.is_empty() {
            return Ok(Selection::All);
        }
        if answer.eq_ignore_ascii_case("q") {
            return Ok(Selection::Cancelled);
        }

        match parse_skip_list(answer, entries.len()) {
            Ok(skipped) => {
                let chosen = entries
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !skipped.contains(&(i + 1)))
                    .map(|(_, entry)| entry.key())
                    .collect();
                return Ok(Selection::Chosen(chosen));
            }
            Err(reason) => writeln!(output, "{reason}")?,
        }
    }
}

/// Parse `1 3,5-7` into the 1-based positions it names.
pub fn parse_skip_list(answer: &str, count: usize) -> Result<BTreeSet<usize>, String> {
    let mut positions = BTreeSet::new();

    for token in answer.split(|c: char| c == ',' || c.is_whitespace()) {
        if token.is_empty() {
            continue;
        }
        let (start, end) = match token.split_once('-') {
            Some((start, end)) => (parse_position(start, count)?, parse_position(end, count)?),
            None => {
                let position = parse_position(token, count)?;
                (position, position)
            }
        };
        if start > end {
            return Err(format!("Invalid range '{token}'"));
        }
        positions.extend(start..=end);
    }

    Ok(positions)
}

fn parse_position(token: &str, count: usize) -> Result<usize, String> {
    match token.trim().parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => Ok(n),
        _ => Err(format!("'{token}' is not a number between 1 and {count}")),
    }
}
