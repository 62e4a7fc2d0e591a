use thiserror::Error;

use crate::job::{JobStatus, StoreError};
use crate::lifecycle::upload::UploadError;
use crate::manifest::ManifestError;
use crate::remote::RemoteError;
use crate::request::message::MessageError;
use crate::slurm::SchedulerError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the dispatch service and lifecycle orchestrator
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Request(#[from] MessageError),

    #[error("job {0} not found")]
    JobNotFound(String),

    /// Terminal states are one-way and jobs never move back to pending
    #[error("job {job_id} can't go from {from} to {to}")]
    InvalidTransition { job_id: String, from: JobStatus, to: JobStatus },

    #[error("job {job_id} is {status}, its results aren't available")]
    NotReady { job_id: String, status: JobStatus },

    #[error("can't stage job files: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The cluster could not be reached; the same call may succeed later
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Scheduler(e) => e.is_transport(),
            Error::Remote(e) => e.is_transport(),
            Error::Upload(UploadError::Remote(e)) => e.is_transport(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::JobNotFound(_))
    }
}
