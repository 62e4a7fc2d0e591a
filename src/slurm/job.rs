use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use tinytemplate::TinyTemplate;

use crate::calculation::Calculation;
use crate::config::{SchedulerConfig, WorkingDirectory};
use crate::remote::command::validate_identifier;
use crate::remote::{RemoteCommand, RemoteError};
use crate::slurm::SchedulerError;

/// Everything needed to submit one calculation
///
/// Paths are relative to the remote root, which is the job's working directory on the cluster.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job_id: String,
    pub calculation: Calculation,
    pub input_path: String,
    pub keywords_path: Option<String>,
    pub opt_type: Option<String>,
    /// SLURM `HH:MM:SS`
    pub wall_time: String,
    pub memory: String,
}

/// A JobPath is the path to a job script that's submitted to SLURM via sbatch
pub struct JobPath {
    pub path: PathBuf,
}

impl JobSpec {
    /// Render the job script into `<wd>/<job_id>/job.sh`
    pub fn create(&self, wd: &WorkingDirectory, config: &SchedulerConfig) -> Result<JobPath, SchedulerError> {
        validate_wall_time(&self.wall_time).map_err(SchedulerError::InvalidJob)?;
        validate_memory(&self.memory).map_err(SchedulerError::InvalidJob)?;

        let instance_wd = wd.job_dir(&self.job_id);
        info!("Creating job {} in working directory {}", &self.job_id, instance_wd.display());
        fs::create_dir_all(&instance_wd)?;

        let header = render_header(self)?;
        let workflow = render_workflow(self, config)?;
        let job = JobTemplate { header, workflow };

        let path = instance_wd.join("job.sh");
        if path.exists() {
            warn!("Job script already exists, it will be overwritten");
            fs::remove_file(&path)?;
        }
        job.write(&path)?;

        Ok(JobPath { path })
    }

    /// Calculation program invocation, every argument quoted for the batch shell
    ///
    /// `<program> <job_id> <input> <type> <method> <basis> <charge> <multiplicity> [--opt-type X] [--keywords-file F]`
    pub fn invocation(&self, program: &[String]) -> Result<RemoteCommand, RemoteError> {
        let calc = &self.calculation;
        let mut command = RemoteCommand::from_argv(program)?
            .arg(validate_identifier(&self.job_id)?)
            .arg(&self.input_path)
            .arg(calc.calculation_type.as_str())
            .arg(&calc.method)
            .arg(&calc.basis_set)
            .arg(calc.charge.to_string())
            .arg(calc.multiplicity.to_string());
        if let Some(opt_type) = &self.opt_type {
            command = command.arg("--opt-type").arg(opt_type);
        }
        if let Some(keywords) = &self.keywords_path {
            command = command.arg("--keywords-file").arg(keywords);
        }
        Ok(command)
    }

    pub fn job_name(&self) -> String {
        format!("qc-{}", self.job_id)
    }
}

/// SLURM time limit: `MM`, `MM:SS`, `HH:MM:SS` or `D-HH[:MM[:SS]]`
///
/// The header is rendered unescaped, so anything else is refused before it reaches `#SBATCH`.
pub fn validate_wall_time(wall_time: &str) -> Result<&str, RemoteError> {
    let time = match wall_time.split_once('-') {
        Some((days, time)) if is_digits(days) => time,
        Some(_) => return Err(RemoteError::InvalidArgument(wall_time.to_string())),
        None => wall_time,
    };
    let mut parts = time.split(':');
    let leading = parts.next().map_or(false, is_digits);
    let rest: Vec<&str> = parts.collect();
    let valid = leading && rest.len() <= 2 && rest.iter().all(|part| part.len() == 2 && is_digits(part));
    match valid {
        true => Ok(wall_time),
        false => Err(RemoteError::InvalidArgument(wall_time.to_string())),
    }
}

/// SLURM memory size: digits with an optional K, M, G or T unit
pub fn validate_memory(memory: &str) -> Result<&str, RemoteError> {
    let digits = memory.strip_suffix(|c: char| matches!(c, 'K' | 'M' | 'G' | 'T')).unwrap_or(memory);
    match is_digits(digits) {
        true => Ok(memory),
        false => Err(RemoteError::InvalidArgument(memory.to_string())),
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// All rendered sections of a batch script
struct JobTemplate {
    header: Header,
    workflow: Workflow,
}

impl JobTemplate {
    /// Write complete job script to disk by appending rendered template sections to the file
    fn write(self, out_path: &Path) -> Result<(), io::Error> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(out_path)?;

        // order is important when writing the file
        let contents = [self.header.content, self.workflow.content];

        for content in contents.iter() {
            file.write_all(content.as_bytes())?;
        }

        Ok(())
    }
}

/// Rendered SBATCH header
///
/// Sets the job name, log files, wall time and memory. Logs go to `logs/` under the remote root,
/// which must exist before sbatch runs because SLURM won't create it.
struct Header {
    content: String,
}

/// Rendered workflow commands
///
/// Environment setup lines from the configuration followed by the calculation program.
struct Workflow {
    content: String,
}

/// Rendering context for header
#[derive(Serialize)]
struct HeaderContext {
    name: String,
    job_id: String,
    log_dir: String,
    wall_time: String,
    memory: String,
    time_now: String,
}

/// Rendering context for workflow
#[derive(Serialize)]
struct WorkflowContext {
    result_dir: String,
    setup: String,
    command: String,
}

fn templates<'a>(name: &'a str, text: &'a str) -> Result<TinyTemplate<'a>, SchedulerError> {
    let mut tt = TinyTemplate::new();
    // shell scripts, not HTML
    tt.set_default_formatter(&tinytemplate::format_unescaped);
    tt.add_template(name, text)?;
    Ok(tt)
}

/// Render the SBATCH header using TinyTemplate
fn render_header(spec: &JobSpec) -> Result<Header, SchedulerError> {
    /// included header template
    static HEADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/header.txt"));
    let tt = templates("header", HEADER)?;

    let context = HeaderContext {
        name: spec.job_name(),
        job_id: spec.job_id.clone(),
        log_dir: "logs".to_string(),
        wall_time: spec.wall_time.clone(),
        memory: spec.memory.clone(),
        time_now: Utc::now().to_rfc3339(),
    };

    Ok(Header { content: tt.render("header", &context)? })
}

/// Render the workflow commands using TinyTemplate
fn render_workflow(spec: &JobSpec, config: &SchedulerConfig) -> Result<Workflow, SchedulerError> {
    /// included workflow template
    static RUN: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/run.txt"));
    let tt = templates("run", RUN)?;

    let command = spec
        .invocation(&config.program)
        .map_err(SchedulerError::InvalidJob)?;
    let context = WorkflowContext {
        result_dir: format!("result/{}", spec.job_id),
        setup: config.setup.join("\n"),
        command: command.to_shell_line(),
    };

    Ok(Workflow { content: tt.render("run", &context)? })
}
