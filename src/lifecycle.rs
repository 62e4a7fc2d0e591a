//! Job lifecycle state machine
//!
//! ```text
//! pending -> running -> completed | failed
//!    \          \
//!     `----------`-----> cancelled
//! ```
//!
//! The orchestrator is the only writer of job status. Observations come from polling SLURM or
//! from explicit updates; both go through the same per-job lock so the terminal check and the
//! upload bookkeeping behave as one compare-and-set. Entering `completed` or `failed` triggers the
//! remote artifact upload once. A failed upload is recorded on the job and retried by the next
//! report of the same terminal state, it never fails the status update itself.

use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};

use crate::error::{Error, Result};
use crate::job::{Job, JobStatus, JobStore};
use crate::slurm::SlurmScheduler;

/// Per-job mutual exclusion
pub mod locks;

/// Remote artifact upload triggered by terminal transitions
pub mod upload;

use locks::JobLocks;
use upload::ResultUploader;

pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    scheduler: Arc<SlurmScheduler>,
    uploader: Arc<ResultUploader>,
    locks: JobLocks,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn JobStore>, scheduler: Arc<SlurmScheduler>, uploader: Arc<ResultUploader>) -> Self {
        Orchestrator { store, scheduler, uploader, locks: JobLocks::new() }
    }

    /// Record a freshly submitted job, always in `pending`
    pub async fn register(&self, mut job: Job) -> Result<Job> {
        let _guard = self.locks.acquire(&job.job_id).await;
        job.status = JobStatus::Pending;
        job.completed_at = None;
        job.runtime_seconds = None;
        job.is_uploaded = false;
        self.store.insert(&job)?;
        info!("Job {} registered as pending (SLURM id {:?})", job.job_id, job.scheduler_id);
        Ok(job)
    }

    /// Ask SLURM for the job's state and apply it
    ///
    /// Unknown scheduler answers and jobs that are already terminal leave the status alone.
    /// Transport failures propagate.
    pub async fn poll(&self, job_id: &str) -> Result<Job> {
        let _guard = self.locks.acquire(job_id).await;
        let mut job = self.load(job_id)?;

        if job.status.is_terminal() {
            self.retry_upload(&mut job).await;
            return Ok(job);
        }
        let scheduler_id = match &job.scheduler_id {
            Some(id) => id.clone(),
            None => return Ok(job),
        };

        let observed = self.scheduler.query_status(&scheduler_id).await?;
        match observed.job_status() {
            Some(status) if status != job.status => {
                info!("SLURM reports job {} as {}", job_id, observed);
                self.transition(&mut job, status).await?;
            }
            Some(_) => {}
            None => info!("SLURM doesn't know job {} ({}) yet", job_id, scheduler_id),
        }
        Ok(job)
    }

    /// Apply a state asserted by a caller
    ///
    /// Repeating the current state is a no-op (which retries an outstanding upload). Leaving a
    /// terminal state or going back to `pending` is an [Error::InvalidTransition] and changes
    /// nothing.
    pub async fn update(&self, job_id: &str, status: JobStatus) -> Result<Job> {
        let _guard = self.locks.acquire(job_id).await;
        let mut job = self.load(job_id)?;

        if job.status == status {
            self.retry_upload(&mut job).await;
            return Ok(job);
        }
        if job.status.is_terminal() || status == JobStatus::Pending {
            warn!("Rejecting transition of job {} from {} to {}", job_id, job.status, status);
            return Err(Error::InvalidTransition { job_id: job_id.to_string(), from: job.status, to: status });
        }

        self.transition(&mut job, status).await?;
        Ok(job)
    }

    fn load(&self, job_id: &str) -> Result<Job> {
        self.store.get(job_id)?.ok_or_else(|| Error::JobNotFound(job_id.to_string()))
    }

    /// Caller holds the job lock and has checked the transition is allowed
    async fn transition(&self, job: &mut Job, status: JobStatus) -> Result<()> {
        let from = job.status;
        job.status = status;
        if status.is_terminal() {
            let now = Utc::now();
            job.completed_at = Some(now);
            job.runtime_seconds = Some((now - job.submitted_at).num_seconds().max(0));
        }
        self.store.save_lifecycle(job)?;
        info!("Job {} moved from {} to {}", job.job_id, from, status);

        self.retry_upload(job).await;
        Ok(())
    }

    /// Upload artifacts if the job finished and nothing has been uploaded yet
    ///
    /// The status is already stored when this runs. If the upload outcome can't be stored the job
    /// stays awaiting upload in the database and the next report uploads again.
    async fn retry_upload(&self, job: &mut Job) {
        if !job.awaiting_upload() {
            return;
        }
        match self.uploader.upload(job).await {
            Ok(()) => {
                info!("Artifacts of job {} uploaded", job.job_id);
                job.is_uploaded = true;
                job.upload_error = None;
            }
            Err(err) => {
                warn!("Upload for job {} failed, will retry on the next status report: {}", job.job_id, err);
                job.upload_error = Some(err.to_string());
            }
        }
        if let Err(err) = self.store.save_lifecycle(job) {
            warn!("Can't record upload outcome of job {}: {}", job.job_id, err);
        }
    }
}
