use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use kemia::config::{Config, RemoteConfig, SchedulerConfig, StorageConfig, Timeouts, WorkingDirectory};
use kemia::job::JobStatus;
use kemia::manifest::{Direction, Outcome};

#[derive(Parser)]
#[command(name = "kemia")]
#[command(about = "Run quantum-chemistry calculations on a SLURM cluster", long_about = None)]
pub struct Cli {
    /// Local directory for the job database and staged job scripts
    #[arg(long, env = "KEMIA_WORKING_DIR", default_value = ".kemia")]
    pub working_dir: PathBuf,

    /// Cluster login host, an alias from the ssh config
    #[arg(long, env = "KEMIA_HOST", default_value = "cluster")]
    pub host: String,

    #[arg(long, env = "KEMIA_SSH", default_value = "ssh")]
    pub ssh: String,

    #[arg(long, env = "KEMIA_SCP", default_value = "scp")]
    pub scp: String,

    /// Remote directory holding uploads, job scripts, logs and results
    #[arg(long, env = "KEMIA_REMOTE_ROOT", default_value = "qc")]
    pub remote_root: String,

    /// ssh connect timeout in seconds
    #[arg(long, env = "KEMIA_CONNECT_TIMEOUT", default_value_t = 10)]
    pub connect_timeout: u64,

    /// Default SLURM wall time
    #[arg(long, env = "KEMIA_WALL_TIME", default_value = "01:00:00")]
    pub wall_time: String,

    /// Default SLURM memory
    #[arg(long, env = "KEMIA_MEMORY", default_value = "4G")]
    pub memory: String,

    /// Shell lines run before the calculation, separated by ';'
    #[arg(long, env = "KEMIA_SETUP", value_delimiter = ';')]
    pub setup: Vec<String>,

    /// Calculation program, job arguments are appended
    #[arg(long, env = "KEMIA_PROGRAM", value_delimiter = ' ', default_value = "python3 advance_analysis.py")]
    pub program: Vec<String>,

    /// Artifact upload program, job arguments are appended
    #[arg(long, env = "KEMIA_UPLOAD_PROGRAM", value_delimiter = ' ', default_value = "python3 upload_results.py")]
    pub upload_program: Vec<String>,

    /// Artifact bucket
    #[arg(long, env = "KEMIA_BUCKET")]
    pub bucket: String,

    #[arg(long, env = "KEMIA_REGION", default_value = "us-east-1")]
    pub region: String,

    /// Key prefix inside the bucket
    #[arg(long, env = "KEMIA_STORAGE_ROOT", default_value = "kemia")]
    pub storage_root: String,

    /// Presigned URL lifetime in seconds
    #[arg(long, env = "KEMIA_URL_VALIDITY", default_value_t = 3600)]
    pub url_validity: u64,

    #[arg(long, env = "KEMIA_COPY_TIMEOUT", default_value_t = 60)]
    pub copy_timeout: u64,

    #[arg(long, env = "KEMIA_SUBMIT_TIMEOUT", default_value_t = 60)]
    pub submit_timeout: u64,

    /// Status, cancel and output reads
    #[arg(long, env = "KEMIA_QUERY_TIMEOUT", default_value_t = 30)]
    pub query_timeout: u64,

    #[arg(long, env = "KEMIA_UPLOAD_TIMEOUT", default_value_t = 120)]
    pub upload_timeout: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit the calculation described by a JSON message file
    Submit { message: PathBuf },
    /// SLURM state of a scheduler id
    Status { scheduler_id: String },
    /// Refresh one job from SLURM, or every active job
    Poll { job_id: Option<String> },
    /// Cancel by SLURM id, or by job id with --job
    Cancel {
        id: String,
        #[arg(long)]
        job: bool,
    },
    /// Report a lifecycle state for a job
    Update { job_id: String, status: JobStatus },
    /// Artifact manifest for any job id and calculation type
    Manifest {
        job_id: String,
        calculation_type: String,
        #[arg(long, value_enum, default_value_t = ManifestDirection::Success)]
        direction: ManifestDirection,
    },
    /// Download URLs of a finished job
    Files { job_id: String },
    /// Download URL of a completed job's archive
    Archive { job_id: String },
    /// Result JSON of a job
    #[command(name = "result")]
    ReadResult { job_id: String },
    /// Error output of a job
    #[command(name = "error")]
    ReadError { job_id: String },
    /// Stored job record
    Show { job_id: String },
    /// Every stored job
    List,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ManifestDirection {
    Upload,
    Success,
    Failure,
}

impl From<ManifestDirection> for Direction {
    fn from(direction: ManifestDirection) -> Self {
        match direction {
            ManifestDirection::Upload => Direction::Upload,
            ManifestDirection::Success => Direction::Download(Outcome::Success),
            ManifestDirection::Failure => Direction::Download(Outcome::Failure),
        }
    }
}

impl Cli {
    pub fn config(&self) -> Config {
        Config {
            working_dir: WorkingDirectory { path: self.working_dir.clone() },
            remote: RemoteConfig {
                host: self.host.clone(),
                ssh_program: self.ssh.clone(),
                scp_program: self.scp.clone(),
                root: self.remote_root.clone(),
                connect_timeout: Duration::from_secs(self.connect_timeout),
            },
            scheduler: SchedulerConfig {
                wall_time: self.wall_time.clone(),
                memory: self.memory.clone(),
                setup: self.setup.clone(),
                program: self.program.clone(),
                upload_program: self.upload_program.clone(),
            },
            storage: StorageConfig {
                bucket: self.bucket.clone(),
                region: self.region.clone(),
                root: self.storage_root.clone(),
                url_validity: Duration::from_secs(self.url_validity),
            },
            timeouts: Timeouts {
                copy: Duration::from_secs(self.copy_timeout),
                submit: Duration::from_secs(self.submit_timeout),
                query: Duration::from_secs(self.query_timeout),
                upload: Duration::from_secs(self.upload_timeout),
            },
        }
    }
}
