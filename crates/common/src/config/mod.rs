//! Configuration management for ScholarMerge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Document store backend
    #[serde(default)]
    pub store: StoreConfig,

    /// Database configuration (postgres backend only)
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Entries-builder pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Similarity index configuration
    #[serde(default)]
    pub similarity: SimilarityConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl StoreBackend {
    /// Whether stored state outlives the process
    pub fn is_persistent(self) -> bool {
        matches!(self, StoreBackend::Postgres)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, hashing
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Texts with fewer content tokens are rejected as too short
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,

    /// Upstream request budget
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

/// One configured source: which adapter handles it and how it is labelled.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SourceConfig {
    pub origin: String,
    pub source_display: String,
    #[serde(default = "default_latest_version")]
    pub latest_version: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Concurrent per-document units of work
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Upper bound on one document's resolve/merge/commit
    #[serde(default = "default_document_timeout")]
    pub document_timeout_secs: u64,

    #[serde(default = "default_retry_initial")]
    pub retry_initial_interval_ms: u64,

    #[serde(default = "default_retry_max_interval")]
    pub retry_max_interval_ms: u64,

    #[serde(default = "default_retry_max_elapsed")]
    pub retry_max_elapsed_ms: u64,

    /// Origins, highest merge priority first
    #[serde(default = "default_origin_priority")]
    pub origin_priority: Vec<String>,

    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,

    /// Document types stored even without an external identifier
    #[serde(default = "default_identifierless_types")]
    pub identifierless_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimilarityConfig {
    /// Neighbors kept per entry
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Pairs at or above this cosine similarity are near-duplicates
    #[serde(default = "default_near_duplicate_threshold")]
    pub near_duplicate_threshold: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_store_backend() -> StoreBackend { StoreBackend::Postgres }
fn default_database_url() -> String { "postgres://localhost/scholarmerge".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_embedding_provider() -> String { "hashing".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_min_tokens() -> usize { 10 }
fn default_requests_per_second() -> u32 { 20 }
fn default_latest_version() -> i32 { 1 }
fn default_workers() -> usize { 8 }
fn default_document_timeout() -> u64 { 60 }
fn default_retry_initial() -> u64 { 50 }
fn default_retry_max_interval() -> u64 { 2_000 }
fn default_retry_max_elapsed() -> u64 { 30_000 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 0 }
fn default_service_name() -> String { "scholarmerge".to_string() }
fn default_top_n() -> usize { 3 }
fn default_near_duplicate_threshold() -> f32 { 0.99 }

fn default_origin_priority() -> Vec<String> {
    [
        "human_submission",
        "publisher",
        "pubmed",
        "preprint",
        "crossref",
        "bulk_dump",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_sources() -> Vec<SourceConfig> {
    vec![SourceConfig {
        origin: "human_submission".to_string(),
        source_display: "Submitted".to_string(),
        latest_version: default_latest_version(),
    }]
}

fn default_identifierless_types() -> Vec<String> {
    vec!["clinical_trial".to_string(), "patent".to_string()]
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { backend: default_store_backend() }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            min_tokens: default_min_tokens(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            document_timeout_secs: default_document_timeout(),
            retry_initial_interval_ms: default_retry_initial(),
            retry_max_interval_ms: default_retry_max_interval(),
            retry_max_elapsed_ms: default_retry_max_elapsed(),
            origin_priority: default_origin_priority(),
            sources: default_sources(),
            identifierless_types: default_identifierless_types(),
        }
    }
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            near_duplicate_threshold: default_near_duplicate_threshold(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__PIPELINE__WORKERS=16
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific config file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Per-document processing budget as Duration
    pub fn document_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.document_timeout_secs)
    }

    /// How far a sweep watermark trails the sweep start. Work stamps its
    /// timestamp before committing and may commit up to one document timeout
    /// later, after a concurrent sweep has already read the store.
    pub fn in_flight_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pipeline.document_timeout_secs as i64)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            database: DatabaseConfig::default(),
            embedding: EmbeddingConfig::default(),
            pipeline: PipelineConfig::default(),
            similarity: SimilarityConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
