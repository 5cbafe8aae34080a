//! Shell command batches with optional elevation.
//!
//! [`CommandRunner`] takes the queued shell commands of a step (admin
//! commands, DNS convergence commands), validates them, and runs them
//! through a [`CommandExecutor`] according to an explicit [`ChainPolicy`]:
//!
//! - `FailFast`: one shell invocation, commands joined with `&&`
//! - `Continue`: one shell invocation, commands joined with `;`
//! - `Sequential`: one invocation per command, stopping at the first failure
//!
//! Windows elevation cannot reliably chain commands in one elevated
//! invocation, so win32 defaults to `Sequential`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ProvisionError;
use crate::executor::{CommandExecutor, CommandSpec, ExecutionResult, ExitState};
use crate::platform::Platform;
use crate::privilege::PrivilegeMethod;

/// How a batch of shell commands is turned into processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainPolicy {
    FailFast,
    Continue,
    Sequential,
}

impl ChainPolicy {
    pub fn default_for(platform: Platform) -> Self {
        match platform {
            Platform::Darwin | Platform::Linux => Self::FailFast,
            Platform::Win32 => Self::Sequential,
        }
    }

    fn separator(&self) -> Option<&'static str> {
        match self {
            Self::FailFast => Some(" && "),
            Self::Continue => Some(" ; "),
            Self::Sequential => None,
        }
    }
}

/// Per-call options for [`CommandRunner::run`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Wrap every invocation with the configured elevation method.
    pub elevated: bool,
    /// Overrides the runner's chain policy for this call.
    pub chain: Option<ChainPolicy>,
    /// The batch only inspects the host and still runs during a dry run.
    pub read_only: bool,
}

impl RunOptions {
    pub fn elevated() -> Self {
        Self {
            elevated: true,
            ..Self::default()
        }
    }

    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }
}

/// Output collected from a successful batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    /// Number of processes spawned (zero in dry-run mode is still counted).
    pub invocations: usize,
    pub stdout: Vec<String>,
    /// stderr chatter from invocations that still exited zero.
    pub stderr: Vec<String>,
}

/// Validates a batch of shell commands.
///
/// Every entry must contain something other than whitespace and must not
/// contain NUL bytes.
pub fn validate_commands<S: AsRef<str>>(commands: &[S]) -> Result<(), ProvisionError> {
    for (index, command) in commands.iter().enumerate() {
        let command = command.as_ref();
        if command.trim().is_empty() {
            return Err(ProvisionError::InvalidCommand(format!(
                "command at index {} is empty",
                index
            )));
        }
        if command.contains('\0') {
            return Err(ProvisionError::InvalidCommand(format!(
                "command at index {} contains a NUL byte",
                index
            )));
        }
    }
    Ok(())
}

/// Validates untyped input (e.g. commands handed over by a plugin as JSON)
/// and converts it into a command list.
pub fn commands_from_value(value: &serde_json::Value) -> Result<Vec<String>, ProvisionError> {
    let serde_json::Value::Array(items) = value else {
        return Err(ProvisionError::InvalidCommand(format!(
            "expected an array of commands, got: {}",
            value
        )));
    };
    let commands = items
        .iter()
        .enumerate()
        .map(|(index, item)| match item {
            serde_json::Value::String(s) => Ok(s.clone()),
            other => Err(ProvisionError::InvalidCommand(format!(
                "command at index {} is not a string: {}",
                index, other
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    validate_commands(&commands)?;
    Ok(commands)
}

/// Runs validated shell command batches.
pub struct CommandRunner {
    executor: Arc<dyn CommandExecutor>,
    platform: Platform,
    privilege: Option<PrivilegeMethod>,
    chain: ChainPolicy,
    timeout: Option<Duration>,
}

impl CommandRunner {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        platform: Platform,
        privilege: Option<PrivilegeMethod>,
    ) -> Self {
        Self {
            executor,
            platform,
            privilege,
            chain: ChainPolicy::default_for(platform),
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_chain(mut self, chain: ChainPolicy) -> Self {
        self.chain = chain;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Builds the process specifications for a batch without running them.
    pub fn plan(&self, commands: &[String], opts: RunOptions) -> Vec<CommandSpec> {
        let privilege = if opts.elevated { self.privilege } else { None };
        let chain = opts.chain.unwrap_or(self.chain);
        let scripts: Vec<String> = match chain.separator() {
            Some(sep) if !commands.is_empty() => vec![commands.join(sep)],
            Some(_) => Vec::new(),
            None => commands.to_vec(),
        };
        scripts
            .into_iter()
            .map(|script| {
                self.shell_spec(script)
                    .with_privilege(privilege)
                    .with_timeout(self.timeout)
                    .with_read_only(opts.read_only)
            })
            .collect()
    }

    fn shell_spec(&self, script: String) -> CommandSpec {
        match self.platform {
            Platform::Win32 => CommandSpec::new("cmd", vec!["/C".to_string(), script]),
            Platform::Darwin | Platform::Linux => {
                CommandSpec::new("sh", vec!["-c".to_string(), script])
            }
        }
    }

    /// Validates and runs `commands`.
    ///
    /// Validation happens before anything is spawned. The first failing
    /// invocation is returned as [`ProvisionError::Execution`]; a non-zero
    /// exit code is authoritative, and stderr output only fails an
    /// invocation that ended without an exit code.
    pub async fn run(&self, commands: &[String], opts: RunOptions) -> Result<RunOutcome> {
        validate_commands(commands)?;

        let mut outcome = RunOutcome::default();
        if commands.is_empty() {
            debug!("no commands to run");
            return Ok(outcome);
        }

        for spec in self.plan(commands, opts) {
            info!("running: {}", spec.display());
            let result = self.executor.execute(&spec).await?;
            outcome.invocations += 1;
            check_result(&spec, &result)?;
            if !result.stderr.is_empty() {
                warn!(
                    lines = result.stderr.len(),
                    "command succeeded but wrote to stderr: {}",
                    spec.display()
                );
            }
            outcome.stdout.extend(result.stdout);
            outcome.stderr.extend(result.stderr);
        }

        Ok(outcome)
    }

    /// Runs a single command elevated and returns its stdout.
    pub async fn exec_elevated(&self, command: &str) -> Result<String> {
        let outcome = self
            .run(&[command.to_string()], RunOptions::elevated())
            .await?;
        Ok(outcome.stdout.join("\n"))
    }

    /// Runs a single host query unelevated and returns its stdout.
    ///
    /// Queries run even when the executor is in dry-run mode.
    pub async fn capture(&self, command: &str) -> Result<String> {
        let outcome = self
            .run(&[command.to_string()], RunOptions::read_only())
            .await?;
        Ok(outcome.stdout.join("\n"))
    }
}

fn check_result(spec: &CommandSpec, result: &ExecutionResult) -> Result<(), ProvisionError> {
    let detail = |status: String| match result.stderr.first() {
        Some(line) => format!("{} ({})", status, line),
        None => status,
    };
    match result.exit {
        ExitState::Exited(0) | ExitState::DryRun => Ok(()),
        ExitState::Exited(code) => Err(ProvisionError::execution(
            spec.display(),
            detail(format!("exit code {}", code)),
        )),
        ExitState::Killed => Err(ProvisionError::execution(
            spec.display(),
            detail("process exited without status (possibly killed by signal)".to_string()),
        )),
    }
}
