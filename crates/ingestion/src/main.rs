//! ScholarMerge Entries Builder
//!
//! Turns raw source records into merged, deduplicated entries:
//! 1. Normalizes raw records the scheduler selects
//! 2. Resolves each normalized document against existing entries
//! 3. Folds it into the matching entries, collapsing duplicates
//! 4. Advances the sweep watermark

mod adapters;
mod errors;
mod loader;
mod merge;
mod priority;
mod processor;
mod resolver;
mod scheduler;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use scholarmerge_common::{
    config::{AppConfig, ObservabilityConfig},
    db::open_store,
    metrics::register_metrics,
    VERSION,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::processor::EntriesBuilder;

#[derive(Parser)]
#[command(name = "ingestion", version, about = "Build merged entries from raw source records")]
struct Cli {
    /// Config file to load instead of the default layering
    #[arg(long, env = "SCHOLARMERGE_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Incremental sweep bounded by the stored watermark
    Sweep,
    /// Merge every normalized document regardless of the watermark
    Rebuild,
    /// Upsert raw records from a JSON-lines file
    Load { path: PathBuf },
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn init_metrics(config: &ObservabilityConfig) -> anyhow::Result<()> {
    if config.metrics_port == 0 {
        return Ok(());
    }
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    register_metrics();
    info!(%addr, "Metrics exporter listening");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;

    init_tracing(&config.observability);
    info!(
        service = %config.observability.service_name,
        "Starting ScholarMerge Entries Builder v{}",
        VERSION
    );
    init_metrics(&config.observability)?;

    let store = open_store(&config).await?;

    match cli.command.unwrap_or(Command::Sweep) {
        Command::Sweep => {
            let report = EntriesBuilder::new(store, &config).sweep().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Rebuild => {
            let report = EntriesBuilder::new(store, &config).rebuild().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Load { path } => {
            let report = loader::load_jsonl(store.as_ref(), &path).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    info!("Entries builder finished");
    Ok(())
}
