//! ScholarMerge Similarity Worker
//!
//! Keeps each entry's list of most similar abstracts current:
//! 1. Embeds abstracts whose cached embedding is missing or stale
//! 2. Scores entries changed since the last sweep against the corpus
//! 3. Merges the results into the bounded neighbor lists

mod cache;
mod errors;
mod index;

use std::net::SocketAddr;

use anyhow::Context;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use scholarmerge_common::{
    config::{AppConfig, ObservabilityConfig},
    db::open_store,
    embeddings::create_embedder,
    metrics::register_metrics,
    VERSION,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::index::SimilarityIndex;

#[derive(Parser)]
#[command(name = "similarity-worker", version, about = "Maintain top-N similar abstracts per entry")]
struct Cli {
    /// Config file to load instead of the default layering
    #[arg(long, env = "SCHOLARMERGE_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Score entries changed since the stored watermark
    Update,
    /// Clear all neighbor lists and score the full corpus
    Rebuild,
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

fn init_metrics(port: u16) -> anyhow::Result<()> {
    if port == 0 {
        return Ok(());
    }
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
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
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;

    init_tracing(&config.observability);
    info!(
        service = %config.observability.service_name,
        "Starting ScholarMerge Similarity Worker v{}",
        VERSION
    );
    init_metrics(config.observability.metrics_port)?;

    let embedder = create_embedder(&config.embedding)?;
    info!(
        model = embedder.model_name(),
        dimension = embedder.dimension(),
        top_n = config.similarity.top_n,
        "Embedder ready"
    );

    let store = open_store(&config).await?;
    let index = SimilarityIndex::new(store, embedder, &config);

    let report = match cli.command.unwrap_or(Command::Update) {
        Command::Update => index.sweep().await?,
        Command::Rebuild => index.rebuild().await?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    info!("Similarity worker finished");
    Ok(())
}
