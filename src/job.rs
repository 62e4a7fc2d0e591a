//! Job records and the store they live in
//!
//! Only the lifecycle orchestrator changes a job's status; the store just persists what it is
//! given. Record storage is a collaborator behind [JobStore], [crate::db::SqliteJobStore] is the
//! shipped implementation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calculation::Calculation;

/// Canonical job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states are one-way: nothing transitions out of them
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Terminal states that produced artifacts worth uploading
    pub fn produces_artifacts(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// db column values are lower case
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown job status {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" | "canceled" => Ok(JobStatus::Cancelled),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// Identity and lifecycle record of one calculation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub job_id: String,
    pub job_name: Option<String>,
    /// File name of the staged structure
    pub input_file: String,
    #[serde(flatten)]
    pub calculation: Calculation,
    pub scheduler_id: Option<String>,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub runtime_seconds: Option<i64>,
    pub is_uploaded: bool,
    /// Last failed upload attempt, cleared by a successful one
    pub upload_error: Option<String>,
}

impl Job {
    /// A freshly submitted job
    pub fn pending(job_id: String, job_name: Option<String>, input_file: String, calculation: Calculation) -> Self {
        Job {
            job_id,
            job_name,
            input_file,
            calculation,
            scheduler_id: None,
            status: JobStatus::Pending,
            submitted_at: Utc::now(),
            completed_at: None,
            runtime_seconds: None,
            is_uploaded: false,
            upload_error: None,
        }
    }

    /// Completed or failed but the artifact upload hasn't gone through yet
    pub fn awaiting_upload(&self) -> bool {
        self.status.produces_artifacts() && !self.is_uploaded
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("corrupt job record {job_id}: {reason}")]
    Corrupt { job_id: String, reason: String },

    #[error("job {0} already exists")]
    Duplicate(String),
}

/// Narrow persistence interface used by the orchestrator and dispatch service
pub trait JobStore: Send + Sync {
    fn insert(&self, job: &Job) -> Result<(), StoreError>;

    fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    fn find_by_scheduler_id(&self, scheduler_id: &str) -> Result<Option<Job>, StoreError>;

    /// Jobs that haven't reached a terminal state, oldest first
    fn active(&self) -> Result<Vec<Job>, StoreError>;

    /// Every job, newest first
    fn list(&self) -> Result<Vec<Job>, StoreError>;

    /// Persist the mutable lifecycle fields (status, completion, upload bookkeeping)
    fn save_lifecycle(&self, job: &Job) -> Result<(), StoreError>;
}
