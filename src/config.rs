//! Explicit configuration handed to the dispatch service at construction
//!
//! Nothing below this module reads the environment; `main` builds a [Config] from CLI flags (which
//! fall back to `KEMIA_*` environment variables) and tests build one by hand.

use std::path::PathBuf;
use std::time::Duration;

/// Local directory holding the job database and per-job staging directories
#[derive(Debug, Clone)]
pub struct WorkingDirectory {
    pub path: PathBuf,
}

impl WorkingDirectory {
    /// Staging directory for one job, e.g. `<wd>/<job_id>/`
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.path.join(job_id)
    }
}

/// How to reach the cluster and where jobs live on it
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Host alias from the ssh config
    pub host: String,
    pub ssh_program: String,
    pub scp_program: String,
    /// Remote root directory, relative paths resolve against the login directory
    pub root: String,
    pub connect_timeout: Duration,
}

impl RemoteConfig {
    pub fn uploads_dir(&self) -> String {
        format!("{}/uploads", self.root)
    }

    pub fn jobs_dir(&self) -> String {
        format!("{}/jobs", self.root)
    }

    pub fn logs_dir(&self) -> String {
        format!("{}/logs", self.root)
    }

    pub fn results_dir(&self, job_id: &str) -> String {
        format!("{}/result/{}", self.root, job_id)
    }
}

/// Batch script defaults and the remote programs that run calculations and upload artifacts
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Default wall time, SLURM `HH:MM:SS`
    pub wall_time: String,
    /// Default memory, SLURM size string such as `4G`
    pub memory: String,
    /// Shell lines run before the calculation (module loads, virtualenv activation)
    pub setup: Vec<String>,
    /// Calculation program argv, the job arguments are appended
    pub program: Vec<String>,
    /// Artifact upload program argv
    pub upload_program: Vec<String>,
}

/// Object storage used for artifact URLs
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    /// Key prefix, artifacts live under `<root>/jobs/` and `<root>/archive/`
    pub root: String,
    pub url_validity: Duration,
}

/// Upper bounds for every remote interaction
#[derive(Debug, Clone)]
pub struct Timeouts {
    pub copy: Duration,
    pub submit: Duration,
    /// Status queries, cancellation and output reads
    pub query: Duration,
    pub upload: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            copy: Duration::from_secs(60),
            submit: Duration::from_secs(60),
            query: Duration::from_secs(30),
            upload: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub working_dir: WorkingDirectory,
    pub remote: RemoteConfig,
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
    pub timeouts: Timeouts,
}

#[cfg(test)]
pub(crate) fn test_config(working_dir: &std::path::Path) -> Config {
    Config {
        working_dir: WorkingDirectory { path: working_dir.to_path_buf() },
        remote: RemoteConfig {
            host: "cluster".to_string(),
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
            root: "qc".to_string(),
            connect_timeout: Duration::from_secs(5),
        },
        scheduler: SchedulerConfig {
            wall_time: "00:15:00".to_string(),
            memory: "4G".to_string(),
            setup: vec!["module load psi4".to_string()],
            program: vec!["python3".to_string(), "advance_analysis.py".to_string()],
            upload_program: vec!["upload-results".to_string()],
        },
        storage: StorageConfig {
            bucket: "kemia-test".to_string(),
            region: "ca-central-1".to_string(),
            root: "kemia".to_string(),
            url_validity: Duration::from_secs(3600),
        },
        timeouts: Timeouts::default(),
    }
}
