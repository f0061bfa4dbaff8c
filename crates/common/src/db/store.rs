//! Document store contract
//!
//! The store is the only shared mutable resource. Every mutation is a single
//! atomic primitive; callers never hold a lock across documents. Both the
//! Postgres repository and the in-process memory store implement it with the
//! same constraint semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::Result;
use crate::identifiers;
use crate::models::{
    Embedding, EntryDocument, NormalizedDocument, PaperRecord, RawRecord, SimilarAbstract,
};

/// Watermark row for the entries builder
pub const ENTRIES_BUILDER_SWEEP: &str = "entries_builder";

/// Watermark row for the similarity index
pub const ABSTRACT_SIMILARITY_SWEEP: &str = "abstract_similarity";

/// Disjunctive identifier lookup. Absent fields never match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierQuery {
    /// Canonical form; versioned stored variants also match
    pub doi: Option<String>,
    pub pmcid: Option<String>,
    pub pubmed_id: Option<String>,
    pub scopus_eid: Option<String>,
    /// Case-sensitive exact match
    pub title: Option<String>,
}

impl IdentifierQuery {
    /// External identifiers of a record, without the title
    pub fn identifiers_of(record: &PaperRecord) -> Self {
        Self {
            doi: record.canonical_doi(),
            pmcid: identifiers::present(record.pmcid.as_deref()),
            pubmed_id: identifiers::present(record.pubmed_id.as_deref()),
            scopus_eid: identifiers::present(record.scopus_eid.as_deref()),
            title: None,
        }
    }

    pub fn title(title: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.doi.is_none()
            && self.pmcid.is_none()
            && self.pubmed_id.is_none()
            && self.scopus_eid.is_none()
            && self.title.is_none()
    }

    /// Whether a stored entry satisfies any clause of the query
    pub fn matches(&self, entry: &EntryDocument) -> bool {
        let record = &entry.record;
        let eq = |clause: &Option<String>, value: &Option<String>| match (clause, value) {
            (Some(c), Some(v)) => c == v,
            _ => false,
        };

        let doi = match (&self.doi, &record.doi) {
            (Some(c), Some(stored)) => identifiers::doi_matches(stored, c),
            _ => false,
        };

        doi || eq(&self.pmcid, &record.pmcid)
            || eq(&self.pubmed_id, &record.pubmed_id)
            || eq(&self.scopus_eid, &record.scopus_eid)
            || eq(&self.title, &record.title)
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    // ------------------------------------------------------------------
    // Raw records
    // ------------------------------------------------------------------

    /// Insert or replace by `(origin, source_key)`; an existing row keeps its id.
    async fn upsert_raw_record(&self, record: RawRecord) -> Result<RawRecord>;

    async fn list_raw_records(&self) -> Result<Vec<RawRecord>>;

    // ------------------------------------------------------------------
    // Normalized documents
    // ------------------------------------------------------------------

    async fn find_normalized(&self, raw_id: Uuid) -> Result<Option<NormalizedDocument>>;

    /// Replace `previous` with `document`, rewriting entry back-references to
    /// the old id so merge history survives the swap.
    async fn swap_normalized(
        &self,
        previous: Option<Uuid>,
        document: &NormalizedDocument,
    ) -> Result<()>;

    /// Normalized documents created at or after `since`, oldest first.
    async fn normalized_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<NormalizedDocument>>;

    // ------------------------------------------------------------------
    // Entries
    // ------------------------------------------------------------------

    /// Entries matching any clause, ordered by ordinal.
    async fn find_by_identifiers(&self, query: &IdentifierQuery) -> Result<Vec<EntryDocument>>;

    async fn get_entry(&self, id: Uuid) -> Result<Option<EntryDocument>>;

    /// Atomically delete `absorbed` and write `survivor`.
    ///
    /// A survivor with revision 0 is inserted; otherwise the stored revision
    /// must equal the survivor's. Absorbed entries must also be unchanged
    /// since read. The stored neighbor list of the survivor is kept. Returns
    /// the entry as stored, with `synced = false` and the revision bumped.
    async fn commit_fold(
        &self,
        survivor: &EntryDocument,
        absorbed: &[EntryDocument],
    ) -> Result<EntryDocument>;

    /// Single-entry write with the same rules as `commit_fold`.
    async fn upsert(&self, entry: &EntryDocument) -> Result<EntryDocument> {
        self.commit_fold(entry, &[]).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Every entry, ordered by ordinal.
    async fn list_entries(&self) -> Result<Vec<EntryDocument>>;

    /// Entries with a non-empty abstract, ordered by ordinal.
    async fn entries_with_abstract(&self) -> Result<Vec<EntryDocument>>;

    /// Replace cached embeddings without touching `last_updated` or revision.
    async fn set_embeddings(
        &self,
        id: Uuid,
        abstract_embedding: Option<&Embedding>,
        title_embedding: Option<&Embedding>,
    ) -> Result<()>;

    /// Merge offers into the entry's bounded neighbor list. Returns whether
    /// the list changed; a change clears `synced`.
    async fn offer_neighbors(
        &self,
        id: Uuid,
        offers: &[SimilarAbstract],
        capacity: usize,
    ) -> Result<bool>;

    /// Empty every neighbor list. Returns how many entries changed.
    async fn clear_neighbors(&self) -> Result<u64>;

    // ------------------------------------------------------------------
    // Export flag
    // ------------------------------------------------------------------

    async fn mark_dirty(&self, id: Uuid) -> Result<()>;

    async fn clear_dirty(&self, id: Uuid) -> Result<()>;

    async fn list_unsynced(&self, limit: usize) -> Result<Vec<EntryDocument>>;

    // ------------------------------------------------------------------
    // Watermarks
    // ------------------------------------------------------------------

    async fn watermark(&self, name: &str) -> Result<Option<DateTime<Utc>>>;

    async fn advance_watermark(&self, name: &str, at: DateTime<Utc>) -> Result<()>;
}
