//! Merged, deduplicated entries and the data the similarity index hangs on them

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::document::PaperRecord;
use super::legacy;

/// A cached embedding together with the text it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    pub norm: f32,
    pub model: String,
    pub text_hash: String,
}

impl Embedding {
    pub fn new(values: Vec<f32>, model: &str, text: &str) -> Self {
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        Self {
            values,
            norm,
            model: model.to_string(),
            text_hash: content_hash(text),
        }
    }

    /// Still valid for this text under this model
    pub fn is_current(&self, text: &str, model: &str) -> bool {
        self.model == model && self.text_hash == content_hash(text)
    }

    /// Cosine similarity; zero when either vector is degenerate.
    pub fn cosine(&self, other: &Embedding) -> f32 {
        if self.norm == 0.0 || other.norm == 0.0 || self.values.len() != other.values.len() {
            return 0.0;
        }
        let dot: f32 = self
            .values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| a * b)
            .sum();
        dot / (self.norm * other.norm)
    }
}

pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// One neighbor in an entry's similar-abstracts list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarAbstract {
    pub entry_id: Uuid,
    #[serde(default)]
    pub doi: Option<String>,
    pub similarity: f32,
}

/// One real-world paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryDocument {
    pub id: Uuid,
    /// Store-assigned insertion order, zero until first committed
    #[serde(default)]
    pub ordinal: i64,
    /// Optimistic concurrency counter, zero until first committed
    #[serde(default)]
    pub revision: i64,
    #[serde(flatten)]
    pub record: PaperRecord,
    #[serde(default)]
    pub is_pre_proof: bool,
    #[serde(default)]
    pub source_documents: Vec<Uuid>,
    #[serde(default)]
    pub is_covid19_ml: Option<f32>,
    #[serde(default, deserialize_with = "legacy::annotations")]
    pub keywords_ml: Vec<String>,
    #[serde(default)]
    pub embedding_abstract: Option<Embedding>,
    #[serde(default)]
    pub embedding_title: Option<Embedding>,
    #[serde(default)]
    pub similar_abstracts: Vec<SimilarAbstract>,
    #[serde(default)]
    pub synced: bool,
}

impl EntryDocument {
    /// A not-yet-stored entry seeded from one record
    pub fn new(record: PaperRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            ordinal: 0,
            revision: 0,
            record,
            is_pre_proof: false,
            source_documents: Vec::new(),
            is_covid19_ml: None,
            keywords_ml: Vec::new(),
            embedding_abstract: None,
            embedding_title: None,
            similar_abstracts: Vec::new(),
            synced: false,
        }
    }

    pub fn is_new(&self) -> bool {
        self.revision == 0
    }

    pub fn abstract_text(&self) -> Option<&str> {
        self.record
            .abstract_text
            .as_deref()
            .filter(|a| !a.trim().is_empty())
    }

    /// Equal in everything a merge can change.
    pub fn same_content(&self, other: &EntryDocument) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        for entry in [&mut a, &mut b] {
            entry.record.last_updated = Default::default();
            entry.synced = false;
            entry.revision = 0;
        }
        a == b
    }
}
