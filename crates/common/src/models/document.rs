//! Per-source document shape shared by normalized documents and entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::legacy;
use crate::identifiers;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "first_name", skip_serializing_if = "Option::is_none")]
    pub first: Option<String>,
    #[serde(default, alias = "last_name", skip_serializing_if = "Option::is_none")]
    pub last: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    #[serde(default, alias = "section_heading", skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    pub text: String,
}

/// Kind of work a record describes
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DocumentType {
    #[default]
    Paper,
    ClinicalTrial,
    Patent,
    News,
    Other(String),
}

impl DocumentType {
    pub fn as_str(&self) -> &str {
        match self {
            DocumentType::Paper => "paper",
            DocumentType::ClinicalTrial => "clinical_trial",
            DocumentType::Patent => "patent",
            DocumentType::News => "news",
            DocumentType::Other(s) => s,
        }
    }
}

impl From<String> for DocumentType {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "" | "paper" => DocumentType::Paper,
            "clinical_trial" => DocumentType::ClinicalTrial,
            "patent" => DocumentType::Patent,
            "news" => DocumentType::News,
            other => DocumentType::Other(other.to_string()),
        }
    }
}

impl From<DocumentType> for String {
    fn from(t: DocumentType) -> Self {
        t.as_str().to_string()
    }
}

/// The canonical per-source schema. Entries carry the same fields, merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperRecord {
    pub doi: Option<String>,
    #[serde(deserialize_with = "legacy::text")]
    pub title: Option<String>,
    #[serde(deserialize_with = "legacy::lenient_list")]
    pub authors: Vec<Author>,
    #[serde(deserialize_with = "legacy::text")]
    pub journal: Option<String>,
    pub journal_short: Option<String>,
    #[serde(deserialize_with = "legacy::first_text")]
    pub issn: Option<String>,
    #[serde(deserialize_with = "legacy::date")]
    pub publication_date: Option<DateTime<Utc>>,
    pub has_year: bool,
    pub has_month: bool,
    pub has_day: bool,
    #[serde(rename = "abstract", deserialize_with = "legacy::text")]
    pub abstract_text: Option<String>,
    pub origin: String,
    pub source_display: String,
    pub link: Option<String>,
    #[serde(deserialize_with = "legacy::lenient_list")]
    pub body_text: Vec<Paragraph>,
    pub has_full_text: Option<bool>,
    #[serde(deserialize_with = "legacy::lenient_list")]
    pub references: Vec<Reference>,
    #[serde(deserialize_with = "legacy::lenient_list")]
    pub cited_by: Vec<Reference>,
    #[serde(deserialize_with = "legacy::annotations")]
    pub category_human: Vec<String>,
    #[serde(deserialize_with = "legacy::annotations")]
    pub keywords: Vec<String>,
    #[serde(deserialize_with = "legacy::annotations")]
    pub summary_human: Vec<String>,
    pub is_preprint: Option<bool>,
    pub is_covid19: Option<bool>,
    pub license: Option<String>,
    pub copyright: Option<String>,
    pub pmcid: Option<String>,
    pub pubmed_id: Option<String>,
    pub scopus_eid: Option<String>,
    pub cord_uid: Option<String>,
    pub who_covidence: Option<String>,
    pub document_type: DocumentType,
    pub version: i32,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl PaperRecord {
    /// Canonical DOI, if the record carries a usable one
    pub fn canonical_doi(&self) -> Option<String> {
        self.doi.as_deref().and_then(identifiers::canonical_doi)
    }

    /// Whether any of the four uniquely-indexed identifiers is present
    pub fn has_external_identifier(&self) -> bool {
        self.canonical_doi().is_some()
            || identifiers::present(self.pmcid.as_deref()).is_some()
            || identifiers::present(self.pubmed_id.as_deref()).is_some()
            || identifiers::present(self.scopus_eid.as_deref()).is_some()
    }

    /// Title with surrounding whitespace removed, if non-empty
    pub fn exact_title(&self) -> Option<&str> {
        self.title.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

/// One adapter's rendition of one raw record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedDocument {
    pub id: Uuid,
    pub raw_id: Uuid,
    #[serde(flatten)]
    pub record: PaperRecord,
}

impl NormalizedDocument {
    pub fn new(raw_id: Uuid, record: PaperRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            raw_id,
            record,
        }
    }
}
