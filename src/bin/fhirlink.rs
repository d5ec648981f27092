//! fhirlink CLI - scheduled export of merged FHIR patients to CSV
//!
//! Runs the merge export on a cron schedule, once on demand, or just checks
//! the effective configuration.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fhirlink::runtime::{serve, MergeExportJob, Settings};

#[derive(Parser)]
#[command(name = "fhirlink")]
#[command(version, about = "Export merged FHIR patient links to CSV for data lake ingestion", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the export on its cron schedule until interrupted
    Serve {
        /// Path to YAML settings file (environment variables override it)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Run a single export and exit
    Once {
        /// Path to YAML settings file (environment variables override it)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Validate settings and print them with secrets redacted
    CheckConfig {
        /// Path to YAML settings file (environment variables override it)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { config } => run_scheduled(config).await,
        Commands::Once { config } => run_once(config).await,
        Commands::CheckConfig { config } => check_config(config),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn load_settings(config: Option<PathBuf>) -> anyhow::Result<Settings> {
    Settings::load(config.as_deref()).context("loading settings")
}

/// Build the job with its long-lived clients
fn build_job(settings: &Settings) -> anyhow::Result<Arc<MergeExportJob>> {
    let source = settings.build_source().context("configuring FHIR client")?;
    let sink = settings.build_sink().context("configuring blob storage")?;

    Ok(Arc::new(MergeExportJob::new(
        Arc::new(source),
        sink,
        settings.storage.container.clone(),
        settings.job.clone(),
    )))
}

async fn run_scheduled(config: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = load_settings(config)?;
    let job = build_job(&settings)?;

    serve(job, &settings.schedule).await
}

async fn run_once(config: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = load_settings(config)?;
    let job = build_job(&settings)?;

    let summary = job.run_once().await.context("export run failed")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

fn check_config(config: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = load_settings(config)?;
    print!("{}", serde_yaml::to_string(&settings.redacted())?);
    Ok(())
}
