//! Raw source records, owned by the adapter for their origin

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: Uuid,
    pub origin: String,
    /// Source-local key, unique within an origin
    pub source_key: String,
    pub payload: serde_json::Value,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RawRecord {
    pub fn new(
        origin: impl Into<String>,
        source_key: impl Into<String>,
        payload: serde_json::Value,
        last_updated: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin: origin.into(),
            source_key: source_key.into(),
            payload,
            last_updated,
            created_at: Utc::now(),
        }
    }
}
