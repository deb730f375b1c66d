//! Error types for convoy with categorization:
//!
//! - **Recoverable coordination errors**: `LockBusy`, `IsolationUnavailable`,
//!   `IsolationCreationFailed`. The coordinator handles these locally by
//!   deferring the request; they never reach the caller.
//! - **Execution errors**: `ExecutionFailed` is the engine's own failure,
//!   forwarded unchanged after cleanup.
//! - **Setup and system errors**: missing branch, bad configuration, IO and
//!   version-control command failures.

use std::path::PathBuf;

use thiserror::Error;

/// Exit code used when a run is terminated by a signal.
pub const TERMINATED_EXIT_CODE: i32 = 130;

/// Top-level error type for every fallible convoy operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Another run holds the lock for this branch
    #[error("branch '{branch}' is locked by {holder}")]
    LockBusy { branch: String, holder: String },

    /// The version-control tool cannot materialize extra checkouts
    #[error("isolation unavailable: {reason}")]
    IsolationUnavailable { reason: String },

    /// Isolation is supported but creating the instance failed
    #[error("failed to create isolated checkout for '{branch}': {reason}")]
    IsolationCreationFailed { branch: String, reason: String },

    /// The execution engine reported failure
    #[error("execution failed: {message}")]
    ExecutionFailed {
        message: String,
        exit_code: Option<i32>,
    },

    /// A lock whose owner process is gone still blocks the branch
    #[error(
        "stale lock on '{branch}' held by {owner_id} (pid {pid} is not running); \
         clear it with `convoy unlock {branch}`"
    )]
    StaleLockDetected {
        branch: String,
        owner_id: String,
        pid: u32,
    },

    /// Target branch does not exist in the repository
    #[error("branch '{0}' does not exist")]
    BranchNotFound(String),

    /// Run was terminated by an external signal
    #[error("run terminated before completion")]
    Terminated,

    /// Request rejected before classification
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// State or config file could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// IO operation failed
    #[error("IO error at {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    /// Version-control command failed
    #[error("{}", vcs_message(.operation, .detail, *.is_not_found))]
    VcsCommand {
        operation: String,
        detail: String,
        is_not_found: bool,
    },
}

fn vcs_message(operation: &str, detail: &str, is_not_found: bool) -> String {
    if is_not_found {
        format!(
            "Failed to {operation}: git is not installed or not in PATH.\n\n\
             Isolation requires git 2.5 or newer.\n\n\
             Error: {detail}"
        )
    } else {
        format!("Failed to {operation}: {detail}")
    }
}

impl Error {
    /// Create an IO error carrying the path it happened on.
    pub fn io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Create a version-control command error.
    pub fn vcs_command(
        operation: impl Into<String>,
        detail: impl Into<String>,
        is_not_found: bool,
    ) -> Self {
        Self::VcsCommand {
            operation: operation.into(),
            detail: detail.into(),
            is_not_found,
        }
    }

    /// Create an execution failure.
    pub fn execution_failed(message: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
            exit_code,
        }
    }

    /// Whether the coordinator absorbs this error by deferring the request.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::LockBusy { .. }
                | Self::IsolationUnavailable { .. }
                | Self::IsolationCreationFailed { .. }
        )
    }

    /// Returns the process exit code for this error.
    ///
    /// Exit code scheme:
    /// - 1: User error (invalid config, parse failure)
    /// - 2: System error (IO, version-control commands)
    /// - 3: Not found (missing branch, tool not installed)
    /// - 4: Invalid state (busy or stale locks, isolation failures)
    /// - 130: Terminated by signal
    /// - engine's own code for execution failures (1 when unknown)
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidRequest(_) | Self::InvalidConfig(_) | Self::Parse(_) => 1,
            Self::Io { .. }
            | Self::VcsCommand {
                is_not_found: false,
                ..
            } => 2,
            Self::BranchNotFound(_)
            | Self::VcsCommand {
                is_not_found: true, ..
            } => 3,
            Self::LockBusy { .. }
            | Self::IsolationUnavailable { .. }
            | Self::IsolationCreationFailed { .. }
            | Self::StaleLockDetected { .. } => 4,
            Self::ExecutionFailed { exit_code, .. } => match exit_code {
                Some(code) => *code,
                None => 1,
            },
            Self::Terminated => TERMINATED_EXIT_CODE,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Parse(format!("Failed to parse config: {err}"))
    }
}

/// Result type alias for convoy operations
pub type Result<T> = std::result::Result<T, Error>;
