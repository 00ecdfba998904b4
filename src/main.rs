//! vulnfix: verify generated vulnerability fixes in throwaway containers.
//!
//! `run` executes one scan job end to end, `cancel` flags a running scan for
//! cooperative cancellation and `status` prints what has been recorded.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vulnfix::ecosystem::EcosystemResolver;
use vulnfix::github::GitHubStatusReporter;
use vulnfix::oracle::GeminiOracle;
use vulnfix::remediation::{OracleFixGenerator, RetryOrchestrator, RetryPolicy};
use vulnfix::sandbox::{DockerCliRuntime, ExecutorSettings, SandboxExecutor};
use vulnfix::scan::{ScanJob, ScanPipeline, ScanStatus};
use vulnfix::store::{ScanStore, SqliteScanStore};
use vulnfix::Config;

#[derive(Parser)]
#[command(name = "vulnfix", version, about, long_about = None)]
struct Cli {
    /// Path to config.toml (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scan job and print its outcome as JSON
    Run {
        /// Scan job JSON file
        #[arg(long)]
        job: PathBuf,
    },
    /// Cancel a pending or running scan
    Cancel {
        scan_id: String,
    },
    /// Print a scan's status, logs and latest snapshot
    Status {
        scan_id: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vulnfix=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(config: &Config) -> Result<Arc<SqliteScanStore>> {
    let db_path = config.db_path()?;
    let store = SqliteScanStore::open(&db_path)
        .with_context(|| format!("Failed to open database '{}'", db_path.display()))?;
    Ok(Arc::new(store))
}

fn build_pipeline(config: &Config, store: Arc<SqliteScanStore>) -> Result<ScanPipeline> {
    let oracle = Arc::new(GeminiOracle::from_config(&config.oracle)?);
    let executor = SandboxExecutor::new(
        Arc::new(DockerCliRuntime::from_config(&config.sandbox)),
        ExecutorSettings::from_config(&config.sandbox),
    );
    let orchestrator = RetryOrchestrator::new(
        Arc::new(OracleFixGenerator::new(oracle.clone())),
        executor,
        RetryPolicy::from_config(&config.remediation),
    );

    let mut pipeline = ScanPipeline::new(EcosystemResolver::new(oracle), orchestrator, store);
    if let Some(reporter) = GitHubStatusReporter::from_config(&config.github)? {
        pipeline = pipeline.with_reporter(Arc::new(reporter));
    } else {
        tracing::debug!("No GitHub token configured, commit statuses disabled");
    }
    Ok(pipeline)
}

async fn run(config: &Config, job_path: &Path) -> Result<ExitCode> {
    let raw = tokio::fs::read_to_string(job_path)
        .await
        .with_context(|| format!("Failed to read job '{}'", job_path.display()))?;
    let job: ScanJob = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse job '{}'", job_path.display()))?;

    let store = open_store(config)?;
    let pipeline = build_pipeline(config, store)?;
    let outcome = pipeline.run(&job).await.context("Failed to start scan")?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(match outcome.status {
        ScanStatus::Failed => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

fn cancel(config: &Config, scan_id: &str) -> Result<ExitCode> {
    let store = open_store(config)?;
    if store.request_cancel(scan_id)? {
        println!("Scan {scan_id} marked as cancelled");
        Ok(ExitCode::SUCCESS)
    } else {
        let status = store.load_status(scan_id)?;
        eprintln!("Scan {scan_id} is already {status}");
        Ok(ExitCode::FAILURE)
    }
}

fn status(config: &Config, scan_id: &str) -> Result<ExitCode> {
    let store = open_store(config)?;
    let report = serde_json::json!({
        "scan_id": scan_id,
        "status": store.load_status(scan_id)?,
        "logs": store.load_logs(scan_id)?,
        "snapshot": store.load_snapshot(scan_id)?,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    config.validate()?;

    match cli.command {
        Commands::Run { job } => run(&config, &job).await,
        Commands::Cancel { scan_id } => cancel(&config, &scan_id),
        Commands::Status { scan_id } => status(&config, &scan_id),
    }
}
