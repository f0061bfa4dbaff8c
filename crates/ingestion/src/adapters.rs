//! Source adapters
//!
//! An adapter turns one raw source record into the canonical per-source
//! schema. Source-specific scrapers live outside this crate; the built-in
//! adapter covers sources whose payload already follows the canonical shape.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use scholarmerge_common::config::{PipelineConfig, SourceConfig};
use scholarmerge_common::models::{PaperRecord, RawRecord};

use crate::errors::{IngestionError, Result};

pub trait SourceAdapter: Send + Sync {
    fn origin(&self) -> &str;

    /// Schema version this adapter currently produces
    fn latest_version(&self) -> i32;

    fn parse(&self, raw: &RawRecord) -> Result<PaperRecord>;
}

/// Adapter for payloads already in the canonical schema.
pub struct CanonicalJsonAdapter {
    origin: String,
    source_display: String,
    latest_version: i32,
}

impl CanonicalJsonAdapter {
    pub fn new(source: &SourceConfig) -> Self {
        Self {
            origin: source.origin.clone(),
            source_display: source.source_display.clone(),
            latest_version: source.latest_version,
        }
    }
}

impl SourceAdapter for CanonicalJsonAdapter {
    fn origin(&self) -> &str {
        &self.origin
    }

    fn latest_version(&self) -> i32 {
        self.latest_version
    }

    fn parse(&self, raw: &RawRecord) -> Result<PaperRecord> {
        if !raw.payload.is_object() {
            return Err(IngestionError::AdapterFailure {
                origin: raw.origin.clone(),
                source_key: raw.source_key.clone(),
                message: "payload is not an object".to_string(),
            });
        }

        let mut record: PaperRecord =
            serde_json::from_value(raw.payload.clone()).map_err(|e| {
                IngestionError::AdapterFailure {
                    origin: raw.origin.clone(),
                    source_key: raw.source_key.clone(),
                    message: e.to_string(),
                }
            })?;

        record.origin = self.origin.clone();
        if record.source_display.trim().is_empty() {
            record.source_display = self.source_display.clone();
        }
        if record.has_full_text.is_none() {
            record.has_full_text = Some(!record.body_text.is_empty());
        }
        record.version = self.latest_version;
        record.last_updated = raw.last_updated;
        record.created_at = Utc::now();

        Ok(record)
    }
}

/// Adapters keyed by origin, loaded once at startup.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One canonical adapter per configured source
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut registry = Self::new();
        for source in &config.sources {
            registry.register(Arc::new(CanonicalJsonAdapter::new(source)));
        }
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.origin().to_string(), adapter);
    }

    pub fn get(&self, origin: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(origin).cloned()
    }
}
