//! The single path from the engine to the outside world.
//!
//! Every git and tmux interaction goes through [`CommandRunner::run`] as an
//! argv array. `SystemRunner` executes real processes; `ScriptedRunner`
//! records invocations and replays canned replies so orchestration flows can
//! be tested without touching a repository or a terminal multiplexer.

use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::{DeskError, Result};

/// Abstraction over external command execution for testability.
/// Real implementation: `SystemRunner`. Test double: `ScriptedRunner`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` to completion and return its stdout.
    ///
    /// A non-zero exit is `DeskError::ToolFailed` carrying the tool's stderr
    /// verbatim. There is no timeout; wrap the future if one is needed.
    async fn run(&self, program: &str, args: &[String]) -> Result<String>;
}

/// Runs commands with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        debug!(program, args = %args.join(" "), "running command");
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| DeskError::Spawn {
                program: program.to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            } else {
                stderr
            };
            return Err(DeskError::ToolFailed {
                program: program.to_string(),
                args: args.join(" "),
                code: output.status.code(),
                message,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Build an owned argv from string slices.
pub fn argv<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter().map(|a| a.as_ref().to_string()).collect()
}

/// One recorded call to a [`ScriptedRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// `program` followed by every arg, space separated.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

type Matcher = Box<dyn Fn(&Invocation) -> bool + Send + Sync>;

enum Reply {
    Output(String),
    Failure { code: Option<i32>, message: String },
}

struct Rule {
    matcher: Matcher,
    reply: Reply,
    remaining: Option<usize>,
}

/// Test double for [`CommandRunner`].
///
/// Rules are checked in the order they were added; the first matching rule
/// with uses left answers the call. Unmatched calls succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `output` to calls of `program` whose args contain every
    /// entry of `needles`.
    pub fn reply(&self, program: &str, needles: &[&str], output: &str) -> &Self {
        self.push(program, needles, Reply::Output(output.to_string()), None)
    }

    /// Like [`reply`](Self::reply) but only for the first `times` matching calls.
    pub fn reply_times(&self, program: &str, needles: &[&str], output: &str, times: usize) -> &Self {
        self.push(program, needles, Reply::Output(output.to_string()), Some(times))
    }

    /// Fail calls of `program` whose args contain every entry of `needles`.
    pub fn fail(&self, program: &str, needles: &[&str], message: &str) -> &Self {
        self.push(
            program,
            needles,
            Reply::Failure {
                code: Some(1),
                message: message.to_string(),
            },
            None,
        )
    }

    /// Like [`fail`](Self::fail) but only for the first `times` matching calls.
    pub fn fail_times(&self, program: &str, needles: &[&str], message: &str, times: usize) -> &Self {
        self.push(
            program,
            needles,
            Reply::Failure {
                code: Some(1),
                message: message.to_string(),
            },
            Some(times),
        )
    }

    fn push(&self, program: &str, needles: &[&str], reply: Reply, remaining: Option<usize>) -> &Self {
        let program = program.to_string();
        let needles: Vec<String> = argv(needles);
        let matcher: Matcher = Box::new(move |inv: &Invocation| {
            inv.program == program && needles.iter().all(|n| inv.has_arg(n))
        });
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                matcher,
                reply,
                remaining,
            });
        }
        self
    }

    /// Every call made so far, oldest first.
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Calls to `program` whose args contain `arg`.
    pub fn calls_with(&self, program: &str, arg: &str) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program && c.has_arg(arg))
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        let invocation = Invocation {
            program: program.to_string(),
            args: args.to_vec(),
        };
        self.calls
            .lock()
            .map_err(|_| DeskError::LockPoisoned)?
            .push(invocation.clone());

        let mut rules = self.rules.lock().map_err(|_| DeskError::LockPoisoned)?;
        for rule in rules.iter_mut() {
            if rule.remaining == Some(0) || !(rule.matcher)(&invocation) {
                continue;
            }
            if let Some(n) = rule.remaining.as_mut() {
                *n -= 1;
            }
            return match &rule.reply {
                Reply::Output(out) => Ok(out.clone()),
                Reply::Failure { code, message } => Err(DeskError::ToolFailed {
                    program: program.to_string(),
                    args: args.join(" "),
                    code: *code,
                    message: message.clone(),
                }),
            };
        }
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[tokio::test]
    async fn scripted_runner_records_calls_in_order() {
        let runner = ScriptedRunner::new();
        runner.run("git", &argv(["status"])).await.unwrap();
        runner.run("tmux", &argv(["ls"])).await.unwrap();
        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].command_line(), "git status");
        assert_eq!(calls[1].program, "tmux");
    }

    #[tokio::test]
    async fn scripted_runner_first_matching_rule_wins() {
        let runner = ScriptedRunner::new();
        runner
            .reply("git", &["diff", "--numstat"], "1\t2\tsrc/a.rs\n")
            .fail("git", &["merge"], "CONFLICT");
        let out = runner
            .run("git", &argv(["-C", "/r", "diff", "--numstat", "main...b"]))
            .await
            .unwrap();
        assert_eq!(out, "1\t2\tsrc/a.rs\n");

        let err = runner
            .run("git", &argv(["merge", "feature/T1"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalTool);
        assert!(err.to_string().contains("CONFLICT"));
    }

    #[tokio::test]
    async fn fail_times_expires() {
        let runner = ScriptedRunner::new();
        runner.fail_times("tmux", &["has-session"], "no server running", 1);
        assert!(runner.run("tmux", &argv(["has-session"])).await.is_err());
        assert!(runner.run("tmux", &argv(["has-session"])).await.is_ok());
    }

    #[tokio::test]
    async fn system_runner_reports_missing_program_as_spawn_error() {
        let err = SystemRunner::new()
            .run("agentdesk-definitely-not-a-program", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DeskError::Spawn { .. }));
        assert_eq!(err.kind(), ErrorKind::ExternalTool);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn system_runner_surfaces_stderr_verbatim() {
        let err = SystemRunner::new()
            .run("sh", &argv(["-c", "echo 'fatal: boom' >&2; exit 3"]))
            .await
            .unwrap_err();
        match err {
            DeskError::ToolFailed { code, message, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(message, "fatal: boom");
            }
            other => panic!("Expected ToolFailed, got {other:?}"),
        }
    }
}
