//! Process execution abstraction for svcdns.
//!
//! This module provides:
//! - [`CommandSpec`]: Specification for a process to spawn
//! - [`ExecutionResult`]: Exit state plus captured output lines
//! - [`CommandExecutor`]: Trait for execution strategies
//! - [`RealCommandExecutor`]: Production implementation on `tokio::process`

mod pipe;
mod real;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::privilege::PrivilegeMethod;

pub use real::RealCommandExecutor;

/// Formats string arguments into a space-separated, debug-quoted string.
pub(crate) fn format_command_args(args: &[String]) -> String {
    args.iter()
        .map(|a| format!("{:?}", a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits off the script of a `cmd /C <script>` invocation.
///
/// `cmd.exe` does not understand the backslash escaping applied to regular
/// arguments on Windows, so the script has to be passed verbatim. Returns
/// the arguments up to and including `/C`, and the script.
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn split_cmd_script(args: &[String]) -> (&[String], Option<&str>) {
    let switch = args.iter().position(|arg| arg.eq_ignore_ascii_case("/C"));
    match switch {
        Some(at) if at + 2 == args.len() && (at == 0 || args[at - 1] == "cmd") => {
            (&args[..=at], Some(args[at + 1].as_str()))
        }
        _ => (args, None),
    }
}

/// Specification for a command to be executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// The program to execute (e.g., "sh")
    pub command: String,
    /// Program arguments
    pub args: Vec<String>,
    /// Privilege elevation method to wrap the command
    pub privilege: Option<PrivilegeMethod>,
    /// Kill the process if it runs longer than this
    pub timeout: Option<Duration>,
    /// Only inspects the host; still spawned in dry-run mode.
    pub read_only: bool,
}

impl CommandSpec {
    /// Creates a new CommandSpec with command and args
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            privilege: None,
            timeout: None,
            read_only: false,
        }
    }

    /// Sets the privilege elevation method
    #[must_use]
    pub fn with_privilege(mut self, privilege: Option<PrivilegeMethod>) -> Self {
        self.privilege = privilege;
        self
    }

    /// Marks the command as a host query
    #[must_use]
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Sets the timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the program and arguments actually spawned, with the
    /// elevation wrapper prepended when one is configured.
    pub fn argv(&self) -> (String, Vec<String>) {
        match self.privilege {
            Some(method) => {
                let mut args = Vec::with_capacity(self.args.len() + 1);
                args.push(self.command.clone());
                args.extend(self.args.iter().cloned());
                (method.command_name().to_string(), args)
            }
            None => (self.command.clone(), self.args.clone()),
        }
    }

    /// Human-readable rendering used in logs and errors.
    pub fn display(&self) -> String {
        let (program, args) = self.argv();
        if args.is_empty() {
            program
        } else {
            format!("{} {}", program, format_command_args(&args))
        }
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    /// The process exited with this code.
    Exited(i32),
    /// The process ended without an exit code (killed by a signal).
    Killed,
    /// Nothing was spawned because the executor runs in dry-run mode.
    DryRun,
}

/// Result of command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub exit: ExitState,
    /// Lines written to stdout, CR/LF trimmed.
    pub stdout: Vec<String>,
    /// Lines written to stderr, CR/LF trimmed.
    pub stderr: Vec<String>,
}

impl ExecutionResult {
    /// A result for a process that exited with `code` and printed nothing.
    pub fn exited(code: i32) -> Self {
        Self {
            exit: ExitState::Exited(code),
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    /// A result for a command skipped in dry-run mode.
    pub fn dry_run() -> Self {
        Self {
            exit: ExitState::DryRun,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    /// Returns true if the command executed successfully.
    ///
    /// In dry-run mode this always returns true.
    pub fn success(&self) -> bool {
        matches!(self.exit, ExitState::Exited(0) | ExitState::DryRun)
    }

    /// Returns the exit code if available
    pub fn code(&self) -> Option<i32> {
        match self.exit {
            ExitState::Exited(code) => Some(code),
            ExitState::Killed | ExitState::DryRun => None,
        }
    }
}

/// Trait for command execution.
///
/// Implementations must be `Send + Sync` so they can be shared behind
/// `Arc<dyn CommandExecutor>` by the runner, the DNS engine and the
/// container engine.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Executes a command with the given specification.
    async fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult>;
}
