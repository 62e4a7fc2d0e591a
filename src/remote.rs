//! Run commands on the cluster login host
//!
//! Everything that touches the cluster goes through [RemoteExecutor], so the scheduler adapter and
//! the lifecycle orchestrator never spawn a transport themselves. The production transport is
//! ssh/scp (see [ssh::SshExecutor]); tests substitute a scripted executor.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Structured, shell-quoted remote command lines
pub mod command;

/// ssh/scp transport with bounded execution time
pub mod ssh;

#[cfg(test)]
pub mod scripted;

pub use command::RemoteCommand;

/// Failures of the remote transport or the remote process
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The transport could not be established (missing binary, unreachable host, auth failure)
    #[error("remote host unavailable: {0}")]
    Unavailable(String),

    #[error("remote command timed out after {0:?}")]
    Timeout(Duration),

    /// The remote process ran and exited non-zero
    #[error("remote command exited with status {exit_code}: {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    /// An argument was refused before it reached the remote shell
    #[error("refusing to send argument {0:?} to the remote host")]
    InvalidArgument(String),
}

impl RemoteError {
    /// Transport problems are retryable, a command that ran and failed is not
    pub fn is_transport(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_) | RemoteError::Timeout(_))
    }
}

/// Outcome of a single remote invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteCommandResult {
    /// None when the process was killed by a signal or never finished
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl RemoteCommandResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        RemoteCommandResult { exit_code: Some(0), stdout: stdout.into(), ..Default::default() }
    }

    pub fn timed_out() -> Self {
        RemoteCommandResult { timed_out: true, ..Default::default() }
    }

    /// Convert timeouts and non-zero exits into errors, keeping the captured output otherwise
    pub fn into_success(self, timeout: Duration) -> Result<RemoteCommandResult, RemoteError> {
        if self.timed_out {
            return Err(RemoteError::Timeout(timeout));
        }
        match self.exit_code {
            Some(0) => Ok(self),
            code => Err(RemoteError::CommandFailed {
                exit_code: code.unwrap_or(-1),
                stderr: self.stderr.trim().to_string(),
            }),
        }
    }
}

/// Remote command execution boundary
///
/// Implementations only report what happened; no retries happen at this layer.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a command and report its raw outcome. Only transport failures are errors here.
    async fn execute(&self, command: &RemoteCommand, timeout: Duration) -> Result<RemoteCommandResult, RemoteError>;

    /// Copy a local file to a path on the remote host
    async fn copy(&self, local: &Path, remote: &str, timeout: Duration) -> Result<(), RemoteError>;

    /// Run a command that must succeed
    async fn run(&self, command: &RemoteCommand, timeout: Duration) -> Result<RemoteCommandResult, RemoteError> {
        self.execute(command, timeout).await?.into_success(timeout)
    }
}
