//! Scripted stand-in for the host's package-manager commands.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use upkeep::backends::{BackendError, CommandOutput, CommandRunner, CommandSpec};
use upkeep::history::{HistoryStore, TransactionRecord};
use upkeep::BackendKind;

#[derive(Debug, Clone)]
enum Reply {
    Output(CommandOutput),
    Timeout,
}

#[derive(Debug)]
struct Rule {
    program: String,
    args: Vec<String>,
    /// Replayed in order; the last reply repeats.
    replies: VecDeque<Reply>,
}

impl Rule {
    fn matches(&self, spec: &CommandSpec) -> bool {
        spec.program == self.program && spec.args.starts_with(&self.args)
    }

    fn next_reply(&mut self) -> Reply {
        if self.replies.len() > 1 {
            self.replies.pop_front().unwrap()
        } else {
            self.replies[0].clone()
        }
    }
}

/// Records every invocation and answers from a script. Commands without a
/// matching rule succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    binaries: HashSet<String>,
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binaries(mut self, binaries: &[&str]) -> Self {
        self.binaries.extend(binaries.iter().map(|b| b.to_string()));
        self
    }

    fn push(&self, program: &str, args: &[&str], reply: Reply) {
        let mut rules = self.rules.lock().unwrap();
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        match rules
            .iter_mut()
            .find(|rule| rule.program == program && rule.args == args)
        {
            Some(rule) => rule.replies.push_back(reply),
            None => rules.push(Rule {
                program: program.to_string(),
                args,
                replies: VecDeque::from([reply]),
            }),
        }
    }

    /// Successful exit with `stdout`.
    pub fn ok(self, program: &str, args: &[&str], stdout: &str) -> Self {
        self.exit(program, args, 0, stdout, "")
    }

    /// Non-zero exit with `stderr`.
    pub fn fail(self, program: &str, args: &[&str], code: i32, stderr: &str) -> Self {
        self.exit(program, args, code, "", stderr)
    }

    pub fn exit(self, program: &str, args: &[&str], code: i32, stdout: &str, stderr: &str) -> Self {
        self.push(
            program,
            args,
            Reply::Output(CommandOutput {
                status: Some(code),
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            }),
        );
        self
    }

    pub fn timeout(self, program: &str, args: &[&str]) -> Self {
        self.push(program, args, Reply::Timeout);
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Invocations rendered as command lines.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(|spec| spec.to_string()).collect()
    }

    /// Invocations that could have changed host state.
    pub fn mutating_lines(&self) -> Vec<String> {
        const READ_ONLY: [&str; 6] = [
            "list --upgradable",
            "check-update",
            "history list",
            "remote-ls",
            "refresh --list",
            "--show-commit",
        ];
        self.command_lines()
            .into_iter()
            .filter(|line| !line.starts_with("dpkg-query") && !line.starts_with("rpm -q"))
            .filter(|line| !line.starts_with("snap list"))
            .filter(|line| !READ_ONLY.iter().any(|marker| line.contains(marker)))
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, BackendError> {
        self.calls.lock().unwrap().push(spec.clone());

        let reply = {
            let mut rules = self.rules.lock().unwrap();
            rules
                .iter_mut()
                .filter(|rule| rule.matches(spec))
                .max_by_key(|rule| rule.args.len())
                .map(|rule| rule.next_reply())
        };

        match reply {
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::Timeout) => Err(BackendError::Timeout {
                command: spec.to_string(),
                seconds: 1,
            }),
            None => Ok(CommandOutput {
                status: Some(0),
                ..CommandOutput::default()
            }),
        }
    }

    fn binary_available(&self, program: &str) -> bool {
        self.binaries.contains(program)
    }
}

pub fn as_runner(runner: &Arc<ScriptedRunner>) -> Arc<dyn CommandRunner> {
    runner.clone()
}

pub fn at(minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 2, 9, minute, second).unwrap()
}

pub fn record(
    timestamp: DateTime<Utc>,
    batch: &str,
    backend: BackendKind,
    unit: &str,
    before: &str,
    after: &str,
) -> TransactionRecord {
    TransactionRecord::update(timestamp, batch, backend, unit, before, after)
}

pub fn write_history(store: &HistoryStore, records: &[TransactionRecord]) {
    for record in records {
        store.append(record).unwrap();
    }
}
