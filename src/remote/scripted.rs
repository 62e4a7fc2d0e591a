//! A scripted stand-in for the cluster, used by tests

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::remote::{RemoteCommand, RemoteCommandResult, RemoteError, RemoteExecutor};

/// Canned reply for the next invocation of a program
pub enum Reply {
    Exit { code: i32, stdout: String, stderr: String },
    Timeout,
    Unavailable,
}

impl Reply {
    pub fn stdout(stdout: &str) -> Self {
        Reply::Exit { code: 0, stdout: stdout.to_string(), stderr: String::new() }
    }

    pub fn fail(code: i32, stderr: &str) -> Self {
        Reply::Exit { code, stdout: String::new(), stderr: stderr.to_string() }
    }
}

/// Replies are queued per program name; unscripted calls succeed with empty output
#[derive(Default)]
pub struct ScriptedExecutor {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<RemoteCommand>>,
    copies: Mutex<Vec<(PathBuf, String)>>,
    copy_failures: Mutex<VecDeque<Reply>>,
    delay: Mutex<Duration>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, program: &str, reply: Reply) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .entry(program.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Make the next copy fail with the given reply
    pub fn fail_next_copy(&self, reply: Reply) {
        self.copy_failures.lock().unwrap().push_back(reply);
    }

    /// Every command sleeps this long before answering
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> Vec<RemoteCommand> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, program: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.program() == program).count()
    }

    pub fn copies(&self) -> Vec<(PathBuf, String)> {
        self.copies.lock().unwrap().clone()
    }
}

fn resolve(reply: Reply) -> Result<RemoteCommandResult, RemoteError> {
    match reply {
        Reply::Exit { code, stdout, stderr } => Ok(RemoteCommandResult {
            exit_code: Some(code),
            stdout,
            stderr,
            timed_out: false,
        }),
        Reply::Timeout => Ok(RemoteCommandResult::timed_out()),
        Reply::Unavailable => Err(RemoteError::Unavailable("connection refused".to_string())),
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn execute(&self, command: &RemoteCommand, _timeout: Duration) -> Result<RemoteCommandResult, RemoteError> {
        self.calls.lock().unwrap().push(command.clone());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(command.program())
            .and_then(|queue| queue.pop_front());
        match reply {
            Some(reply) => resolve(reply),
            None => Ok(RemoteCommandResult::success("")),
        }
    }

    async fn copy(&self, local: &Path, remote: &str, timeout: Duration) -> Result<(), RemoteError> {
        self.copies.lock().unwrap().push((local.to_path_buf(), remote.to_string()));
        match self.copy_failures.lock().unwrap().pop_front() {
            Some(reply) => resolve(reply)?.into_success(timeout).map(|_| ()),
            None => Ok(()),
        }
    }
}
