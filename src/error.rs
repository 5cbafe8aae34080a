//! Domain-specific error types for svcdns.
//!
//! This module defines `ProvisionError`, a `thiserror`-based enum that
//! provides typed error variants for the failure modes of step graph
//! construction, command execution and DNS convergence. Public API
//! functions return `Result<T, ProvisionError>` for programmatic error
//! handling, while trait boundaries (step handlers, executors, providers)
//! continue to use `anyhow::Result`.
//!
//! `ProvisionError` implements `Into<anyhow::Error>`, so the `?` operator
//! converts it automatically at trait boundaries that return `anyhow::Result`.

use std::io;

/// Formats an IO error kind into a human-readable message.
///
/// Provides consistent messages for common IO error kinds
/// (e.g., "I/O error: not found") instead of the OS-level messages
/// (e.g., "No such file or directory (os error 2)"). For unrecognized
/// error kinds, falls back to including the OS-level error message.
pub(crate) fn io_error_kind_message(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => "I/O error: not found".to_string(),
        io::ErrorKind::PermissionDenied => "I/O error: permission denied".to_string(),
        io::ErrorKind::IsADirectory => "I/O error: is a directory".to_string(),
        io::ErrorKind::InvalidData => "I/O error: invalid data".to_string(),
        _ => format!("I/O error: {}", err),
    }
}

/// Domain-specific error type for svcdns.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProvisionError {
    /// A step with the same name was already registered in the graph.
    #[error("duplicate step: '{name}' is already registered")]
    DuplicateStep { name: String },

    /// A dependency or subscription names a step that was never registered.
    #[error("step '{step}' references unknown step '{reference}'")]
    UnknownStep { step: String, reference: String },

    /// Dependencies (or subscriptions) form a cycle.
    ///
    /// The cycle is listed in traversal order with the first step repeated
    /// at the end, e.g. `a -> b -> a`.
    #[error("dependency cycle detected: {}", cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    /// Malformed input to the command runner; nothing was executed.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The hypervisor did not report a host-only adapter for the VM.
    #[error("network adapter not found for VM '{vm}': {reason}")]
    AdapterNotFound { vm: String, reason: String },

    /// A command execution failed (non-zero exit, stderr without exit status,
    /// spawn or wait failure).
    #[error("command execution failed: {command}: {status}")]
    Execution {
        /// The command that was executed.
        command: String,
        /// Human-readable reason: exit code, signal information or an
        /// internal failure description.
        status: String,
    },

    /// The program could not be located on `PATH`.
    #[error("command not found in PATH: {command}")]
    CommandNotFound { command: String },

    /// A command did not finish within the configured timeout.
    #[error("command timed out after {seconds}s: {command}")]
    Timeout { command: String, seconds: u64 },

    /// A configuration file could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A validation constraint was violated.
    #[error("validation error: {0}")]
    Validation(String),

    /// An I/O operation failed with contextual information.
    #[error("{context}: {message}")]
    Io {
        /// What was being done when the error occurred, usually including a path.
        context: String,
        /// Message derived from [`io_error_kind_message`].
        message: String,
        /// The underlying I/O error, preserved for programmatic inspection.
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    /// Creates an `Io` variant with the `message` field derived from `source`.
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: io_error_kind_message(&source),
            source,
        }
    }

    /// Creates an `Execution` variant.
    pub(crate) fn execution(command: impl Into<String>, status: impl Into<String>) -> Self {
        Self::Execution {
            command: command.into(),
            status: status.into(),
        }
    }
}
