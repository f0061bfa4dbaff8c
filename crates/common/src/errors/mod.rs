//! Error types for ScholarMerge services
//!
//! Provides a single error taxonomy shared by the ingestion and similarity
//! workers:
//! - Distinct error types for different failure modes
//! - Machine-readable error codes grouped by class
//! - Retry classification for the store-level conflict policy

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Resource errors (4xxx)
    EntryNotFound,
    UnknownOrigin,

    // Conflict errors (5xxx)
    UniquenessConflict,
    StaleRevision,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    UpstreamError,
    EmbeddingError,
    EmbeddingTooShort,
    EmbeddingTimeout,
    AdapterFailure,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Resources (4xxx)
            ErrorCode::EntryNotFound => 4001,
            ErrorCode::UnknownOrigin => 4002,

            // Conflicts (5xxx)
            ErrorCode::UniquenessConflict => 5001,
            ErrorCode::StaleRevision => 5002,

            // Database (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            // External (8xxx)
            ErrorCode::UpstreamError => 8001,
            ErrorCode::EmbeddingError => 8002,
            ErrorCode::EmbeddingTooShort => 8003,
            ErrorCode::EmbeddingTimeout => 8004,
            ErrorCode::AdapterFailure => 8005,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Resource errors
    #[error("Entry not found: {id}")]
    EntryNotFound { id: Uuid },

    #[error("No adapter registered for origin: {origin}")]
    UnknownOrigin { origin: String },

    // Conflict errors
    #[error("Uniqueness conflict on {field} = {value}")]
    UniquenessConflict { field: String, value: String },

    #[error("Entry {id} was modified concurrently")]
    StaleRevision { id: Uuid },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Text too short to embed: {tokens} tokens, minimum {minimum}")]
    EmbeddingTooShort { tokens: usize, minimum: usize },

    #[error("Embedding timeout after {timeout_ms}ms")]
    EmbeddingTimeout { timeout_ms: u64 },

    #[error("Adapter for {origin} failed on {source_key}: {message}")]
    AdapterFailure {
        origin: String,
        source_key: String,
        message: String,
    },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::EntryNotFound { .. } => ErrorCode::EntryNotFound,
            AppError::UnknownOrigin { .. } => ErrorCode::UnknownOrigin,
            AppError::UniquenessConflict { .. } => ErrorCode::UniquenessConflict,
            AppError::StaleRevision { .. } => ErrorCode::StaleRevision,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::EmbeddingTooShort { .. } => ErrorCode::EmbeddingTooShort,
            AppError::EmbeddingTimeout { .. } => ErrorCode::EmbeddingTimeout,
            AppError::AdapterFailure { .. } => ErrorCode::AdapterFailure,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Conflicts detected by the store are resolved by re-reading and retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::UniquenessConflict { .. } | AppError::StaleRevision { .. }
        )
    }

    /// Errors that exclude a document from the similarity index but nothing else
    pub fn is_embedding_failure(&self) -> bool {
        matches!(
            self,
            AppError::EmbeddingError { .. }
                | AppError::EmbeddingTooShort { .. }
                | AppError::EmbeddingTimeout { .. }
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
