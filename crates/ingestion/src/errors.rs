//! Ingestion service error types

use scholarmerge_common::errors::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("No adapter registered for origin {0}")]
    UnknownOrigin(String),

    #[error("Adapter {origin} failed on {source_key}: {message}")]
    AdapterFailure {
        origin: String,
        source_key: String,
        message: String,
    },

    #[error("Document {id} timed out after {timeout_ms}ms")]
    Timeout { id: Uuid, timeout_ms: u64 },

    #[error("Invalid input at line {line}: {message}")]
    InvalidInput { line: usize, message: String },

    #[error("Store error: {0}")]
    Store(#[from] AppError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl IngestionError {
    /// Failures that leave the document eligible for the next sweep
    pub fn is_document_scoped(&self) -> bool {
        matches!(
            self,
            IngestionError::AdapterFailure { .. }
                | IngestionError::Timeout { .. }
                | IngestionError::UnknownOrigin(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, IngestionError>;
