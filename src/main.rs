use std::fs;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use rusoto_credential::{ChainProvider, ProvideAwsCredentials};
use serde::Serialize;

use kemia::calculation::CalculationType;
use kemia::db::open::open_db;
use kemia::db::SqliteJobStore;
use kemia::dispatch::DispatchService;
use kemia::manifest::{ManifestBuilder, S3Signer};
use kemia::remote::ssh::SshExecutor;
use kemia::request::schema::load_schema;
use kemia::request::Message;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = cli.config();
    info!("kemia {} starting up", env!("CARGO_PKG_VERSION"));

    fs::create_dir_all(&config.working_dir.path)
        .with_context(|| format!("can't create working directory {}", config.working_dir.path.display()))?;
    let conn = open_db(&config.working_dir).context("can't open job database")?;
    let store = Arc::new(SqliteJobStore::new(conn));

    let credentials = ChainProvider::new()
        .credentials()
        .await
        .context("no AWS credentials for signing artifact URLs")?;
    let signer = S3Signer::new(&config.storage, credentials)?;
    let manifests = ManifestBuilder::new(Box::new(signer), config.storage.root.clone());

    let executor = Arc::new(SshExecutor::new(&config.remote));
    let service = DispatchService::new(config, executor, store, manifests);

    run(&service, cli.command).await
}

async fn run(service: &DispatchService, command: Commands) -> Result<()> {
    match command {
        Commands::Submit { message } => {
            let schema = load_schema()?;
            let request = Message { path: message, compiled_schema: &schema }.read()?;
            print_json(&service.submit_calculation(&request).await?)
        }
        Commands::Status { scheduler_id } => {
            let state = service.get_status(&scheduler_id).await?;
            print_json(&serde_json::json!({ "scheduler_id": scheduler_id, "state": state }))
        }
        Commands::Poll { job_id: Some(job_id) } => print_json(&service.poll(&job_id).await?),
        Commands::Poll { job_id: None } => print_json(&service.poll_active().await?),
        Commands::Cancel { id, job } => {
            let outcome = if job { service.cancel_job(&id).await? } else { service.cancel(&id).await };
            print_json(&serde_json::json!({ "id": id, "outcome": outcome }))
        }
        Commands::Update { job_id, status } => print_json(&service.update_lifecycle(&job_id, status).await?),
        Commands::Manifest { job_id, calculation_type, direction } => {
            let calculation_type = CalculationType::from(calculation_type);
            print_json(&service.get_manifest(&job_id, &calculation_type, direction.into())?)
        }
        Commands::Files { job_id } => print_json(&service.job_files(&job_id)?),
        Commands::Archive { job_id } => print_json(&service.archive_url(&job_id)?),
        Commands::ReadResult { job_id } => match service.result(&job_id).await? {
            Some(result) => print_raw(&result),
            None => bail!("no result for job {job_id} yet"),
        },
        Commands::ReadError { job_id } => match service.error_output(&job_id).await? {
            Some(error) => print_raw(&error),
            None => bail!("no error output for job {job_id}"),
        },
        Commands::Show { job_id } => print_json(&service.job(&job_id)?),
        Commands::List => print_json(&service.jobs()?),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_raw(text: &str) -> Result<()> {
    println!("{}", text.trim_end());
    Ok(())
}
