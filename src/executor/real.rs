//! Real command executor implementation.
//!
//! This module provides [`RealCommandExecutor`], which spawns processes
//! with `tokio::process::Command` and streams their output in real-time.

use std::process::Stdio;

use anyhow::Result;
use async_trait::async_trait;
use tokio::process::Command;
use which::which;

use super::pipe::{StreamType, read_pipe_to_log};
use super::{CommandExecutor, CommandSpec, ExecutionResult, ExitState};
use crate::error::ProvisionError;

/// Command executor that runs actual system commands.
///
/// When `dry_run` is true, commands are logged but not executed,
/// and `execute()` returns an [`ExitState::DryRun`] result. Read-only
/// specs are host queries and always run.
pub struct RealCommandExecutor {
    pub dry_run: bool,
}

#[async_trait]
impl CommandExecutor for RealCommandExecutor {
    async fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        if self.dry_run && !spec.read_only {
            tracing::info!("dry run: {}", spec.display());
            return Ok(ExecutionResult::dry_run());
        }

        let (program, args) = spec.argv();
        let resolved = which(&program).map_err(|_| ProvisionError::CommandNotFound {
            command: program.clone(),
        })?;
        tracing::trace!("command found: {}: {}", program, resolved.to_string_lossy());

        let mut command = Command::new(resolved);
        push_args(&mut command, &args);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            ProvisionError::execution(spec.display(), format!("failed to spawn: {}", e))
        })?;
        tracing::trace!("spawned command: {}: pid={:?}", program, child.id());

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let run = async {
            tokio::join!(
                read_pipe_to_log(stdout_pipe, StreamType::Stdout),
                read_pipe_to_log(stderr_pipe, StreamType::Stderr),
                child.wait(),
            )
        };

        let finished = match spec.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.ok(),
            None => Some(run.await),
        };

        let Some((stdout, stderr, status)) = finished else {
            if let Err(e) = child.kill().await {
                tracing::debug!("kill after timeout returned error: {}", e);
            }
            return Err(ProvisionError::Timeout {
                command: spec.display(),
                seconds: spec.timeout.map(|t| t.as_secs()).unwrap_or_default(),
            }
            .into());
        };

        let status = status.map_err(|e| {
            ProvisionError::execution(spec.display(), format!("failed to wait for command: {}", e))
        })?;

        let exit = match status.code() {
            Some(code) => {
                tracing::debug!(code, "command exited: {}", program);
                ExitState::Exited(code)
            }
            None => {
                tracing::warn!("command ended without exit code: {}", program);
                ExitState::Killed
            }
        };

        Ok(ExecutionResult { exit, stdout, stderr })
    }
}

#[cfg(windows)]
fn push_args(command: &mut Command, args: &[String]) {
    let (plain, script) = super::split_cmd_script(args);
    command.args(plain);
    if let Some(script) = script {
        command.raw_arg(script);
    }
}

#[cfg(not(windows))]
fn push_args(command: &mut Command, args: &[String]) {
    command.args(args);
}
