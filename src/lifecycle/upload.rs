use std::fs;
use std::io;
use std::sync::Arc;

use log::info;
use thiserror::Error;

use crate::calculation::CalculationType;
use crate::config::{Config, RemoteConfig, Timeouts, WorkingDirectory};
use crate::job::{Job, JobStatus};
use crate::manifest::{Direction, ManifestBuilder, ManifestError};
use crate::remote::command::validate_identifier;
use crate::remote::{RemoteCommand, RemoteError, RemoteExecutor};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("can't write upload manifest: {0}")]
    Io(#[from] io::Error),

    #[error("can't encode upload manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("upload program failed: {0}")]
    Remote(#[from] RemoteError),
}

/// Hands presigned upload URLs to the cluster and runs the artifact upload program there
pub struct ResultUploader {
    executor: Arc<dyn RemoteExecutor>,
    manifests: Arc<ManifestBuilder>,
    working_dir: WorkingDirectory,
    remote: RemoteConfig,
    upload_program: Vec<String>,
    timeouts: Timeouts,
}

impl ResultUploader {
    pub fn new(config: &Config, executor: Arc<dyn RemoteExecutor>, manifests: Arc<ManifestBuilder>) -> Self {
        ResultUploader {
            executor,
            manifests,
            working_dir: config.working_dir.clone(),
            remote: config.remote.clone(),
            upload_program: config.scheduler.upload_program.clone(),
            timeouts: config.timeouts.clone(),
        }
    }

    /// Sign a fresh upload manifest and copy it next to the job's inputs
    ///
    /// Returns the remote path of the manifest, `<root>/uploads/<job_id>_urls.json`. URLs expire,
    /// so every upload attempt stages a new one.
    pub async fn stage_manifest(&self, job_id: &str, calculation_type: &CalculationType) -> Result<String, UploadError> {
        let job_id = validate_identifier(job_id)?;
        let manifest = self.manifests.build(job_id, calculation_type, Direction::Upload)?;

        let job_dir = self.working_dir.job_dir(job_id);
        fs::create_dir_all(&job_dir)?;
        let local = job_dir.join("upload_urls.json");
        fs::write(&local, serde_json::to_vec_pretty(&manifest)?)?;

        let remote = format!("{}/{}_urls.json", self.remote.uploads_dir(), job_id);
        self.executor.copy(&local, &remote, self.timeouts.copy).await?;
        Ok(remote)
    }

    /// Run `<upload_program> <job_id> <calc_type> <true|false> <urls_path>` for a finished job
    pub async fn upload(&self, job: &Job) -> Result<(), UploadError> {
        let success = job.status == JobStatus::Completed;
        let urls = self.stage_manifest(&job.job_id, &job.calculation.calculation_type).await?;

        let command = RemoteCommand::from_argv(&self.upload_program)?
            .arg(&job.job_id)
            .arg(job.calculation.calculation_type.as_str())
            .arg(success.to_string())
            .arg(urls);
        info!("Uploading artifacts of job {} (success: {})", job.job_id, success);
        self.executor.run(&command, self.timeouts.upload).await?;
        Ok(())
    }
}
