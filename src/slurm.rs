//! SLURM adapter: render job scripts, submit them, query and cancel jobs
//!
//! Status and cancellation report routine outcomes ("not registered yet", "nothing to cancel") as
//! plain values. Only transport failures and unparseable submissions are errors.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::job::JobStatus;
use crate::remote::RemoteError;

/// Render job script templates and write them to the job's staging directory
pub mod job;

/// Map raw SLURM state strings onto canonical states
pub mod state;

/// sbatch / sacct / scancel over a [crate::remote::RemoteExecutor]
pub mod scheduler;

pub use job::JobSpec;
pub use scheduler::{OutputFile, SlurmScheduler};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("submission failed: {0}")]
    SubmissionFailed(#[source] RemoteError),

    #[error("scheduler unreachable: {0}")]
    Transport(#[source] RemoteError),

    /// The scheduler answered, but not in a shape we understand
    #[error("unexpected scheduler output: {0:?}")]
    UnparseableOutput(String),

    #[error("invalid job parameters: {0}")]
    InvalidJob(#[source] RemoteError),

    #[error("can't render job script: {0}")]
    Template(#[from] tinytemplate::error::Error),

    #[error("can't write job script: {0}")]
    Io(#[from] std::io::Error),
}

impl SchedulerError {
    /// True when the cluster could not be reached, as opposed to answering strangely
    pub fn is_transport(&self) -> bool {
        match self {
            SchedulerError::SubmissionFailed(e) | SchedulerError::Transport(e) => e.is_transport(),
            _ => false,
        }
    }
}

/// Canonical scheduler-side state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchedulerState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    /// Not (yet) known to the scheduler, a normal answer right after submission
    Unknown,
}

impl SchedulerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SchedulerState::Completed | SchedulerState::Failed | SchedulerState::Cancelled)
    }

    /// Lifecycle status this observation implies, if any
    pub fn job_status(&self) -> Option<JobStatus> {
        match self {
            SchedulerState::Pending => Some(JobStatus::Pending),
            SchedulerState::Running => Some(JobStatus::Running),
            SchedulerState::Completed => Some(JobStatus::Completed),
            SchedulerState::Failed => Some(JobStatus::Failed),
            SchedulerState::Cancelled => Some(JobStatus::Cancelled),
            SchedulerState::Unknown => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerState::Pending => "PENDING",
            SchedulerState::Running => "RUNNING",
            SchedulerState::Completed => "COMPLETED",
            SchedulerState::Failed => "FAILED",
            SchedulerState::Cancelled => "CANCELLED",
            SchedulerState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a best-effort cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CancelOutcome {
    Cancelled,
    /// The job could not be cancelled, including when it had already finished
    Failed,
}

impl fmt::Display for CancelOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CancelOutcome::Cancelled => write!(f, "CANCELLED"),
            CancelOutcome::Failed => write!(f, "FAILED"),
        }
    }
}
