//! In-process document store
//!
//! Backs tests and single-process runs. One mutex guards all state, so every
//! trait method is atomic exactly like its transactional Postgres
//! counterpart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::store::{DocumentStore, IdentifierQuery};
use crate::errors::{AppError, Result};
use crate::models::{Embedding, EntryDocument, NormalizedDocument, RawRecord, SimilarAbstract};
use crate::neighbors::NeighborHeap;

#[derive(Default)]
struct State {
    raw: HashMap<Uuid, RawRecord>,
    normalized: HashMap<Uuid, NormalizedDocument>,
    entries: HashMap<Uuid, EntryDocument>,
    next_ordinal: i64,
    watermarks: HashMap<String, DateTime<Utc>>,
}

impl State {
    fn sorted_entries(
        &self,
        filter: impl Fn(&EntryDocument) -> bool,
    ) -> Vec<EntryDocument> {
        let mut entries: Vec<EntryDocument> = self
            .entries
            .values()
            .filter(|e| filter(e))
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.ordinal);
        entries
    }

    /// Sparse uniqueness of the four external identifiers
    fn check_unique(&self, candidate: &EntryDocument) -> Result<()> {
        for field in UNIQUE_FIELDS {
            let Some(value) = identifier(candidate, field) else {
                continue;
            };
            let taken = self
                .entries
                .values()
                .any(|other| other.id != candidate.id && identifier(other, field) == Some(value));
            if taken {
                return Err(AppError::UniquenessConflict {
                    field: field.to_string(),
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }
}

const UNIQUE_FIELDS: [&str; 4] = ["doi", "pmcid", "pubmed_id", "scopus_eid"];

fn identifier<'a>(entry: &'a EntryDocument, field: &str) -> Option<&'a String> {
    let record = &entry.record;
    match field {
        "doi" => record.doi.as_ref(),
        "pmcid" => record.pmcid.as_ref(),
        "pubmed_id" => record.pubmed_id.as_ref(),
        "scopus_eid" => record.scopus_eid.as_ref(),
        _ => None,
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert_raw_record(&self, mut record: RawRecord) -> Result<RawRecord> {
        let mut state = self.state.lock().await;
        let existing = state
            .raw
            .values()
            .find(|r| r.origin == record.origin && r.source_key == record.source_key)
            .map(|r| (r.id, r.created_at));
        if let Some((id, created_at)) = existing {
            record.id = id;
            record.created_at = created_at;
        }
        state.raw.insert(record.id, record.clone());
        Ok(record)
    }

    async fn list_raw_records(&self) -> Result<Vec<RawRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<RawRecord> = state.raw.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn find_normalized(&self, raw_id: Uuid) -> Result<Option<NormalizedDocument>> {
        let state = self.state.lock().await;
        Ok(state.normalized.values().find(|d| d.raw_id == raw_id).cloned())
    }

    async fn swap_normalized(
        &self,
        previous: Option<Uuid>,
        document: &NormalizedDocument,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(previous) = previous {
            state.normalized.remove(&previous);
            for entry in state.entries.values_mut() {
                for member in entry.source_documents.iter_mut() {
                    if *member == previous {
                        *member = document.id;
                    }
                }
            }
        }
        state.normalized.insert(document.id, document.clone());
        Ok(())
    }

    async fn normalized_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<NormalizedDocument>> {
        let state = self.state.lock().await;
        let mut docs: Vec<NormalizedDocument> = state
            .normalized
            .values()
            .filter(|d| since.map_or(true, |s| d.record.created_at >= s))
            .cloned()
            .collect();
        docs.sort_by_key(|d| d.record.created_at);
        Ok(docs)
    }

    async fn find_by_identifiers(&self, query: &IdentifierQuery) -> Result<Vec<EntryDocument>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.state.lock().await;
        Ok(state.sorted_entries(|e| query.matches(e)))
    }

    async fn get_entry(&self, id: Uuid) -> Result<Option<EntryDocument>> {
        let state = self.state.lock().await;
        Ok(state.entries.get(&id).cloned())
    }

    async fn commit_fold(
        &self,
        survivor: &EntryDocument,
        absorbed: &[EntryDocument],
    ) -> Result<EntryDocument> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        for gone in absorbed {
            match state.entries.get(&gone.id) {
                Some(stored) if stored.revision == gone.revision => {}
                _ => return Err(AppError::StaleRevision { id: gone.id }),
            }
        }

        let current = state
            .entries
            .get(&survivor.id)
            .map(|c| (c.revision, c.ordinal, c.similar_abstracts.clone()));

        let mut stored = survivor.clone();
        match current {
            None if survivor.is_new() => {
                stored.ordinal = state.next_ordinal + 1;
                stored.similar_abstracts.clear();
            }
            Some((revision, ordinal, neighbors))
                if !survivor.is_new() && revision == survivor.revision =>
            {
                stored.ordinal = ordinal;
                stored.similar_abstracts = neighbors;
            }
            _ => return Err(AppError::StaleRevision { id: survivor.id }),
        }
        stored.revision = survivor.revision + 1;
        stored.synced = false;

        // Uniqueness is checked against the post-delete view
        let removed: Vec<EntryDocument> = absorbed
            .iter()
            .filter_map(|gone| state.entries.remove(&gone.id))
            .collect();
        if let Err(err) = state.check_unique(&stored) {
            for entry in removed {
                state.entries.insert(entry.id, entry);
            }
            return Err(err);
        }

        if survivor.is_new() {
            state.next_ordinal = stored.ordinal;
        }
        state.entries.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.entries.remove(&id).is_some())
    }

    async fn list_entries(&self) -> Result<Vec<EntryDocument>> {
        let state = self.state.lock().await;
        Ok(state.sorted_entries(|_| true))
    }

    async fn entries_with_abstract(&self) -> Result<Vec<EntryDocument>> {
        let state = self.state.lock().await;
        Ok(state.sorted_entries(|e| e.abstract_text().is_some()))
    }

    async fn set_embeddings(
        &self,
        id: Uuid,
        abstract_embedding: Option<&Embedding>,
        title_embedding: Option<&Embedding>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or(AppError::EntryNotFound { id })?;
        entry.embedding_abstract = abstract_embedding.cloned();
        entry.embedding_title = title_embedding.cloned();
        Ok(())
    }

    async fn offer_neighbors(
        &self,
        id: Uuid,
        offers: &[SimilarAbstract],
        capacity: usize,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or(AppError::EntryNotFound { id })?;

        let mut heap = NeighborHeap::from_list(capacity, &entry.similar_abstracts);
        let mut changed = false;
        for offer in offers {
            changed |= heap.offer(offer.clone());
        }
        if changed {
            entry.similar_abstracts = heap.into_sorted_vec();
            entry.synced = false;
        }
        Ok(changed)
    }

    async fn clear_neighbors(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut cleared = 0;
        for entry in state.entries.values_mut() {
            if !entry.similar_abstracts.is_empty() {
                entry.similar_abstracts.clear();
                entry.synced = false;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn mark_dirty(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or(AppError::EntryNotFound { id })?;
        entry.synced = false;
        Ok(())
    }

    async fn clear_dirty(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or(AppError::EntryNotFound { id })?;
        entry.synced = true;
        Ok(())
    }

    async fn list_unsynced(&self, limit: usize) -> Result<Vec<EntryDocument>> {
        let state = self.state.lock().await;
        let mut entries = state.sorted_entries(|e| !e.synced);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn watermark(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        let state = self.state.lock().await;
        Ok(state.watermarks.get(name).copied())
    }

    async fn advance_watermark(&self, name: &str, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.watermarks.insert(name.to_string(), at);
        Ok(())
    }
}
