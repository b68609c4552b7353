//! Flatpak adapter, one instance per installation scope

use crate::backends::{
    error::{BackendError, RevertError},
    parse::{parse_listing, ParseOutcome},
    runner::{CommandRunner, CommandSpec},
    BackendAdapter, BackendKind, PendingUnit, UnitChange,
};
use crate::history::TransactionRecord;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlatpakScope {
    System,
    User,
}

impl FlatpakScope {
    /// Installation flag passed to every flatpak invocation.
    pub fn flag(&self) -> &'static str {
        match self {
            FlatpakScope::System => "--system",
            FlatpakScope::User => "--user",
        }
    }

    /// Prefix used in recorded states.
    pub fn prefix(&self) -> &'static str {
        match self {
            FlatpakScope::System => "system",
            FlatpakScope::User => "user",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FlatpakScope::System => "FLATPAK_SYSTEM",
            FlatpakScope::User => "FLATPAK_USER",
        }
    }

    /// Encode `commit` as a recorded state, e.g. `user:4f1c...`.
    pub fn encode_state(&self, commit: &str) -> String {
        format!("{}:{}", self.prefix(), commit)
    }

    /// Split a recorded state into scope and commit. Values without a
    /// recognised prefix belong to the system installation.
    pub fn decode_state(state: &str) -> (FlatpakScope, &str) {
        match state.split_once(':') {
            Some(("system", commit)) => (FlatpakScope::System, commit),
            Some(("user", commit)) => (FlatpakScope::User, commit),
            _ => (FlatpakScope::System, state),
        }
    }
}

impl fmt::Display for FlatpakScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

pub struct FlatpakAdapter {
    runner: Arc<dyn CommandRunner>,
    scope: FlatpakScope,
}

impl FlatpakAdapter {
    pub fn new(runner: Arc<dyn CommandRunner>, scope: FlatpakScope) -> Self {
        Self { runner, scope }
    }

    pub fn scope(&self) -> FlatpakScope {
        self.scope
    }

    fn flatpak(&self, subcommand: &str, scope: FlatpakScope) -> CommandSpec {
        CommandSpec::new("flatpak").arg(subcommand).arg(scope.flag())
    }

    async fn run_checked(&self, spec: CommandSpec) -> Result<String, BackendError> {
        let output = self.runner.run(&spec).await?;
        Ok(output.require_success(&spec)?.stdout)
    }
}

/// Parse `flatpak remote-ls --updates --columns=application,version`.
pub fn parse_remote_updates(text: &str) -> ParseOutcome<PendingUnit> {
    parse_listing(text, &["Application"], |line| {
        let mut fields = line.split('\t').map(str::trim);
        let app = fields.next().filter(|app| is_app_id(app))?;
        let descriptor = match fields.next() {
            Some(version) if !version.is_empty() => format!("-> {version}"),
            _ => "update available".to_string(),
        };
        Some(PendingUnit::new(app, descriptor))
    })
}

fn is_app_id(candidate: &str) -> bool {
    // Reverse-DNS, at least three components, no spaces.
    candidate.split('.').filter(|part| !part.is_empty()).count() >= 3
        && !candidate.contains(char::is_whitespace)
}

fn is_commit_unavailable(stderr: &str) -> bool {
    stderr.contains("not found") || stderr.contains("Can't find") || stderr.contains("No such")
}

#[async_trait]
impl BackendAdapter for FlatpakAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Flatpak
    }

    fn label(&self) -> &str {
        self.scope.label()
    }

    async fn detect(&self) -> bool {
        self.runner.binary_available("flatpak")
    }

    async fn list_pending(&self) -> Result<Vec<PendingUnit>, BackendError> {
        let spec = self
            .flatpak("remote-ls", self.scope)
            .args(["--updates", "--columns=application,version"]);
        let stdout = self.run_checked(spec).await?;
        Ok(parse_remote_updates(&stdout).or_empty(self.label()))
    }

    async fn current_state(&self, unit: &str) -> Result<Option<String>, BackendError> {
        let spec = self.flatpak("info", self.scope).arg("--show-commit").arg(unit);
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Ok(None);
        }
        let commit = output.stdout.trim();
        Ok((!commit.is_empty()).then(|| self.scope.encode_state(commit)))
    }

    async fn apply_units(&self, units: &[String]) -> Result<(), BackendError> {
        if units.is_empty() {
            return Ok(());
        }
        info!("{}: updating {} application(s)", self.label(), units.len());
        let spec = self
            .flatpak("update", self.scope)
            .args(["-y", "--noninteractive"])
            .args(units.iter().cloned());
        self.run_checked(spec).await?;
        Ok(())
    }

    async fn cleanup(&self, _recorded: &[UnitChange]) -> Result<(), BackendError> {
        let spec = self
            .flatpak("uninstall", self.scope)
            .args(["--unused", "-y", "--noninteractive"]);
        self.run_checked(spec).await?;
        Ok(())
    }

    async fn revert(&self, record: &TransactionRecord) -> Result<(), RevertError> {
        let spec = if record.is_fresh_install() {
            let (scope, _) = FlatpakScope::decode_state(&record.after);
            debug!("Flatpak: {} was newly installed in {} scope, uninstalling", record.unit, scope);
            self.flatpak("uninstall", scope)
                .args(["-y", "--noninteractive"])
                .arg(&record.unit)
        } else {
            let (scope, commit) = FlatpakScope::decode_state(&record.before);
            self.flatpak("update", scope)
                .args(["-y", "--noninteractive"])
                .arg(format!("--commit={commit}"))
                .arg(&record.unit)
        };

        let output = self.runner.run(&spec).await?;
        if output.success() {
            return Ok(());
        }
        if is_commit_unavailable(&output.stderr) {
            let (_, commit) = FlatpakScope::decode_state(&record.before);
            return Err(RevertError::CommitUnavailable {
                unit: record.unit.clone(),
                commit: commit.to_string(),
            });
        }
        Err(output.into_failure(&spec).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_remote_updates() {
        let text = "Application\tVersion\n\
            org.mozilla.firefox\t125.0.3\n\
            org.gnome.Platform\t\n";
        let units = parse_remote_updates(text).or_empty("FLATPAK_SYSTEM");
        assert_eq!(
            units,
            vec![
                PendingUnit::new("org.mozilla.firefox", "-> 125.0.3"),
                PendingUnit::new("org.gnome.Platform", "update available"),
            ]
        );
    }

    #[test]
    fn test_parse_remote_updates_rejects_prose() {
        let outcome = parse_remote_updates("error: No remote refs found\n");
        assert!(matches!(outcome, ParseOutcome::Unparsable { .. }));
    }

    #[test]
    fn test_state_encoding() {
        assert_eq!(FlatpakScope::User.encode_state("abc123"), "user:abc123");
        assert_eq!(
            FlatpakScope::decode_state("user:abc123"),
            (FlatpakScope::User, "abc123")
        );
        assert_eq!(
            FlatpakScope::decode_state("system:abc123"),
            (FlatpakScope::System, "abc123")
        );
        // Older records carry a bare commit.
        assert_eq!(
            FlatpakScope::decode_state("abc123"),
            (FlatpakScope::System, "abc123")
        );
    }

    #[test]
    fn test_commit_unavailable_detection() {
        assert!(is_commit_unavailable("error: Commit abc123 not found"));
        assert!(is_commit_unavailable("error: Can't find ref org.foo.Bar"));
        assert!(!is_commit_unavailable("error: Permission denied"));
    }
}
