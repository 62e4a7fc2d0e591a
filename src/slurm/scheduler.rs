use std::sync::Arc;

use log::{info, warn};

use crate::config::{Config, RemoteConfig, SchedulerConfig, Timeouts, WorkingDirectory};
use crate::remote::command::validate_identifier;
use crate::remote::{RemoteCommand, RemoteError, RemoteExecutor};
use crate::slurm::job::JobSpec;
use crate::slurm::{state, CancelOutcome, SchedulerError, SchedulerState};

/// Output files the calculation program leaves in `result/<job_id>/`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFile {
    Result,
    Error,
}

impl OutputFile {
    fn file_name(&self) -> &'static str {
        match self {
            OutputFile::Result => "result.json",
            OutputFile::Error => "result.err",
        }
    }
}

/// SLURM job ids are plain integers
pub fn is_scheduler_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_digit())
}

/// Scheduler id from `sbatch` confirmation output, e.g. `Submitted batch job 12345`
pub fn parse_submission(stdout: &str) -> Result<String, SchedulerError> {
    match stdout.split_whitespace().last() {
        Some(token) if is_scheduler_id(token) => Ok(token.to_string()),
        _ => Err(SchedulerError::UnparseableOutput(stdout.trim().to_string())),
    }
}

/// Drives sbatch, sacct and scancel on the cluster through a [RemoteExecutor]
pub struct SlurmScheduler {
    executor: Arc<dyn RemoteExecutor>,
    working_dir: WorkingDirectory,
    remote: RemoteConfig,
    scheduler: SchedulerConfig,
    timeouts: Timeouts,
}

impl SlurmScheduler {
    pub fn new(config: &Config, executor: Arc<dyn RemoteExecutor>) -> Self {
        SlurmScheduler {
            executor,
            working_dir: config.working_dir.clone(),
            remote: config.remote.clone(),
            scheduler: config.scheduler.clone(),
            timeouts: config.timeouts.clone(),
        }
    }

    /// Render, stage and submit a job script, returning the SLURM job id
    pub async fn submit(&self, spec: &JobSpec) -> Result<String, SchedulerError> {
        let job_id = validate_identifier(&spec.job_id).map_err(SchedulerError::InvalidJob)?;
        let job_path = spec.create(&self.working_dir, &self.scheduler)?;

        let remote_script = format!("{}/{}.sh", self.remote.jobs_dir(), job_id);
        self.executor
            .copy(&job_path.path, &remote_script, self.timeouts.copy)
            .await
            .map_err(SchedulerError::SubmissionFailed)?;

        let sbatch = RemoteCommand::new("sbatch")
            .arg(format!("--chdir={}", self.remote.root))
            .arg(remote_script);
        info!("Running sbatch process for job {job_id}");
        let output = self
            .executor
            .run(&sbatch, self.timeouts.submit)
            .await
            .map_err(SchedulerError::SubmissionFailed)?;

        let scheduler_id = parse_submission(&output.stdout)?;
        info!("SLURM job id: {scheduler_id}");
        Ok(scheduler_id)
    }

    /// Canonical state of a SLURM job
    ///
    /// Ids the scheduler doesn't know (yet), empty accounting output and failing sacct calls are
    /// all [SchedulerState::Unknown]. Only transport failures are errors.
    pub async fn query_status(&self, scheduler_id: &str) -> Result<SchedulerState, SchedulerError> {
        if !is_scheduler_id(scheduler_id) {
            warn!("Not a SLURM job id: {scheduler_id:?}");
            return Ok(SchedulerState::Unknown);
        }
        let sacct = RemoteCommand::new("sacct").args(["-n", "-j", scheduler_id, "--format=State", "--parsable2"]);
        match self.executor.run(&sacct, self.timeouts.query).await {
            Ok(output) => Ok(state::parse_sacct(&output.stdout)),
            Err(RemoteError::CommandFailed { exit_code, stderr }) => {
                info!("sacct exited {exit_code} for {scheduler_id}: {stderr}");
                Ok(SchedulerState::Unknown)
            }
            Err(err) => Err(SchedulerError::Transport(err)),
        }
    }

    /// Best-effort cancellation, never fails
    ///
    /// Jobs that already finished are reported as [CancelOutcome::Failed] without calling scancel.
    /// Otherwise the job counts as cancelled only if sacct says CANCELLED right after scancel.
    pub async fn cancel(&self, scheduler_id: &str) -> CancelOutcome {
        match self.query_status(scheduler_id).await {
            Ok(state) if state.is_terminal() => {
                info!("SLURM job {scheduler_id} already finished ({state}), nothing to cancel");
                return CancelOutcome::Failed;
            }
            Ok(_) => {}
            Err(err) => {
                warn!("Can't query SLURM job {scheduler_id} before cancelling: {err}");
                return CancelOutcome::Failed;
            }
        }
        if !is_scheduler_id(scheduler_id) {
            return CancelOutcome::Failed;
        }

        let scancel = RemoteCommand::new("scancel").arg(scheduler_id);
        if let Err(err) = self.executor.run(&scancel, self.timeouts.query).await {
            warn!("scancel failed for {scheduler_id}: {err}");
            return CancelOutcome::Failed;
        }

        match self.query_status(scheduler_id).await {
            Ok(SchedulerState::Cancelled) => {
                info!("SLURM job {scheduler_id} cancelled");
                CancelOutcome::Cancelled
            }
            Ok(state) => {
                warn!("SLURM job {scheduler_id} is {state} after scancel");
                CancelOutcome::Failed
            }
            Err(err) => {
                warn!("Can't confirm cancellation of {scheduler_id}: {err}");
                CancelOutcome::Failed
            }
        }
    }

    /// Contents of a job's result or error file, None if the file isn't there (yet)
    pub async fn read_output(&self, job_id: &str, file: OutputFile) -> Result<Option<String>, SchedulerError> {
        let job_id = validate_identifier(job_id).map_err(SchedulerError::InvalidJob)?;
        let path = format!("{}/{}", self.remote.results_dir(job_id), file.file_name());
        let cat = RemoteCommand::new("cat").arg(&path);
        match self.executor.run(&cat, self.timeouts.query).await {
            Ok(output) => Ok(Some(output.stdout)),
            Err(RemoteError::CommandFailed { .. }) => {
                info!("No {} found for job {job_id}", file.file_name());
                Ok(None)
            }
            Err(err) => Err(SchedulerError::Transport(err)),
        }
    }
}
