//! JSON-lines raw record loader

use std::path::Path;

use chrono::{DateTime, Utc};
use scholarmerge_common::db::DocumentStore;
use scholarmerge_common::models::RawRecord;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{IngestionError, Result};

#[derive(Debug, Deserialize)]
struct RawLine {
    origin: String,
    source_key: String,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
    payload: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub loaded: u64,
    pub rejected: u64,
}

fn parse_line(line: usize, text: &str) -> Result<RawRecord> {
    let raw: RawLine = serde_json::from_str(text).map_err(|e| IngestionError::InvalidInput {
        line,
        message: e.to_string(),
    })?;
    if raw.origin.trim().is_empty() || raw.source_key.trim().is_empty() {
        return Err(IngestionError::InvalidInput {
            line,
            message: "origin and source_key are required".to_string(),
        });
    }
    Ok(RawRecord::new(
        raw.origin.trim(),
        raw.source_key.trim(),
        raw.payload,
        raw.last_updated.unwrap_or_else(Utc::now),
    ))
}

/// Upsert every well-formed line; malformed lines are logged and counted.
pub async fn load_lines(store: &dyn DocumentStore, content: &str) -> Result<LoadReport> {
    let mut report = LoadReport::default();

    for (index, text) in content.lines().enumerate() {
        if text.trim().is_empty() {
            continue;
        }
        match parse_line(index + 1, text) {
            Ok(record) => {
                store.upsert_raw_record(record).await?;
                report.loaded += 1;
            }
            Err(e) => {
                report.rejected += 1;
                warn!(error = %e, "Skipping raw record line");
            }
        }
    }

    Ok(report)
}

pub async fn load_jsonl(store: &dyn DocumentStore, path: &Path) -> Result<LoadReport> {
    let content = tokio::fs::read_to_string(path).await?;
    let report = load_lines(store, &content).await?;
    info!(
        path = %path.display(),
        loaded = report.loaded,
        rejected = report.rejected,
        "Raw records loaded"
    );
    Ok(report)
}
