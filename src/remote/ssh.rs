use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use tokio::process::Command;

use crate::config::RemoteConfig;
use crate::remote::command::validate_path;
use crate::remote::{RemoteCommand, RemoteCommandResult, RemoteError, RemoteExecutor};

/// ssh reserves this exit status for its own failures (connection, authentication)
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Execute commands on the cluster through the system ssh client
///
/// The host is an alias from the user's ssh config, so keys, jump hosts and multiplexing are
/// configured there and not here. BatchMode is forced because nobody can answer a password prompt.
pub struct SshExecutor {
    host: String,
    ssh_program: String,
    scp_program: String,
    connect_timeout: Duration,
}

impl SshExecutor {
    pub fn new(config: &RemoteConfig) -> Self {
        SshExecutor {
            host: config.host.clone(),
            ssh_program: config.ssh_program.clone(),
            scp_program: config.scp_program.clone(),
            connect_timeout: config.connect_timeout,
        }
    }

    fn transport_options(&self, command: &mut Command) {
        command
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)));
    }

    /// Spawn and wait, killing the child if the deadline passes first
    async fn output(&self, mut command: Command, timeout: Duration) -> Result<Option<Output>, RemoteError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|err| {
            RemoteError::Unavailable(format!("can't start transport process: {err}"))
        })?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(Some(output)),
            Ok(Err(err)) => Err(RemoteError::Unavailable(format!("transport process failed: {err}"))),
            Err(_) => Ok(None),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, command: &RemoteCommand, timeout: Duration) -> Result<RemoteCommandResult, RemoteError> {
        let line = command.to_shell_line();
        let mut ssh = Command::new(&self.ssh_program);
        self.transport_options(&mut ssh);
        ssh.arg(&self.host).arg("--").arg(&line);
        debug!("ssh {} -- {}", self.host, line);

        let output = match self.output(ssh, timeout).await? {
            Some(output) => output,
            None => {
                info!("Remote command timed out after {:?}: {}", timeout, line);
                return Ok(RemoteCommandResult::timed_out());
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.code() == Some(SSH_TRANSPORT_FAILURE) {
            return Err(RemoteError::Unavailable(stderr.trim().to_string()));
        }

        Ok(RemoteCommandResult {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
            timed_out: false,
        })
    }

    async fn copy(&self, local: &Path, remote: &str, timeout: Duration) -> Result<(), RemoteError> {
        validate_path(remote)?;
        let mut scp = Command::new(&self.scp_program);
        self.transport_options(&mut scp);
        scp.arg("-q").arg(local).arg(format!("{}:{}", self.host, remote));
        info!("Copying {} to {}:{}", local.display(), self.host, remote);

        let result = match self.output(scp, timeout).await? {
            Some(output) => RemoteCommandResult {
                exit_code: output.status.code(),
                stdout: String::new(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                timed_out: false,
            },
            None => RemoteCommandResult::timed_out(),
        };
        result.into_success(timeout).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor(ssh_program: &str) -> SshExecutor {
        SshExecutor {
            host: "cluster".to_string(),
            ssh_program: ssh_program.to_string(),
            scp_program: ssh_program.to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_missing_transport_binary_is_unavailable() {
        let exec = executor("/nonexistent/kemia-ssh");
        let err = exec
            .execute(&RemoteCommand::new("true"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_copy_rejects_unsafe_remote_path() {
        let exec = executor("/nonexistent/kemia-scp");
        let err = exec
            .copy(Path::new("job.sh"), "../../etc/passwd", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::InvalidArgument(_)));
    }
}
