//! ScholarMerge Common Library
//!
//! Shared code for the ScholarMerge workers including:
//! - Document model (raw records, normalized documents, entries)
//! - Identifier canonicalization
//! - Document store contract with Postgres and in-memory backends
//! - Embedding client abstraction
//! - Bounded neighbor heap
//! - Error types, retry policy, configuration, and metrics

pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod identifiers;
pub mod metrics;
pub mod models;
pub mod neighbors;
pub mod retry;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{DocumentStore, IdentifierQuery};
pub use embeddings::Embedder;
pub use errors::{AppError, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default remote embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension for the local embedder
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 256;
