//! Similarity worker error types

use scholarmerge_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimilarityError {
    #[error("Store error: {0}")]
    Store(#[from] AppError),

    #[error("Similarity task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, SimilarityError>;
