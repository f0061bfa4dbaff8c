//! Entries builder
//!
//! One sweep runs in two phases:
//! 1. Parse: every raw record the scheduler selects is normalized and swapped
//!    in for its previous rendition.
//! 2. Fold: every normalized document created since the watermark is resolved
//!    against the entries and merged into them.
//!
//! Both phases fan out over a bounded worker pool. A failing document is
//! logged and left for the next sweep; it never aborts the batch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use scholarmerge_common::config::AppConfig;
use scholarmerge_common::db::{DocumentStore, ENTRIES_BUILDER_SWEEP};
use scholarmerge_common::metrics;
use scholarmerge_common::models::{NormalizedDocument, RawRecord};
use scholarmerge_common::retry::{self, RetryPolicy};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::AdapterRegistry;
use crate::errors::{IngestionError, Result};
use crate::merge::MergeEngine;
use crate::priority::PriorityTable;
use crate::resolver::IdentityResolver;
use crate::scheduler::needs_reparse;

/// Counters for one sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub parsed: u64,
    pub skipped: u64,
    pub parse_failures: u64,
    pub created: u64,
    pub merged: u64,
    pub unchanged: u64,
    pub absorbed: u64,
    pub dropped: u64,
    pub fold_failures: u64,
    /// Folds re-run after another writer committed first
    pub conflict_retries: u64,
    /// Watermark stored at the end of the sweep
    pub watermark: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    Parsed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOutcome {
    Created,
    Merged { absorbed: usize },
    Unchanged,
    /// No identifier and no qualifying type
    Dropped,
}

/// One document's fold, with how many times it lost a commit race
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Folded {
    pub outcome: FoldOutcome,
    pub conflict_retries: u32,
}

pub struct EntriesBuilder {
    store: Arc<dyn DocumentStore>,
    adapters: AdapterRegistry,
    resolver: IdentityResolver,
    engine: MergeEngine,
    retry: RetryPolicy,
    workers: usize,
    document_timeout: Duration,
    in_flight: chrono::Duration,
}

impl EntriesBuilder {
    pub fn new(store: Arc<dyn DocumentStore>, config: &AppConfig) -> Self {
        let pipeline = &config.pipeline;
        Self {
            resolver: IdentityResolver::new(store.clone(), pipeline.identifierless_types.clone()),
            store,
            adapters: AdapterRegistry::from_config(pipeline),
            engine: MergeEngine::new(PriorityTable::new(pipeline.origin_priority.clone())),
            retry: RetryPolicy::from_config(pipeline),
            workers: pipeline.workers.max(1),
            document_timeout: config.document_timeout(),
            in_flight: config.in_flight_window(),
        }
    }

    /// Replace the adapter set
    pub fn with_adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = adapters;
        self
    }

    /// Incremental sweep bounded by the stored watermark.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let since = self.store.watermark(ENTRIES_BUILDER_SWEEP).await?;
        self.run(since).await
    }

    /// Fold every normalized document regardless of the watermark.
    pub async fn rebuild(&self) -> Result<SweepReport> {
        self.run(None).await
    }

    async fn run(&self, since: Option<DateTime<Utc>>) -> Result<SweepReport> {
        let started = Instant::now();
        let mut report = SweepReport::default();

        info!(since = ?since, workers = self.workers, "Starting entries sweep");

        self.parse_pending(&mut report).await?;

        let fold_started = Utc::now();
        let documents = self.store.normalized_since(since).await?;
        info!(documents = documents.len(), "Folding normalized documents");

        let mut earliest_failure: Option<DateTime<Utc>> = None;
        let mut results = stream::iter(documents)
            .map(|doc| async move {
                let outcome = self.fold_with_timeout(&doc).await;
                (doc, outcome)
            })
            .buffer_unordered(self.workers);

        while let Some((doc, folded)) = results.next().await {
            let outcome = folded.map(|f| {
                report.conflict_retries += u64::from(f.conflict_retries);
                f.outcome
            });
            match outcome {
                Ok(FoldOutcome::Created) => report.created += 1,
                Ok(FoldOutcome::Merged { absorbed }) => {
                    report.merged += 1;
                    report.absorbed += absorbed as u64;
                }
                Ok(FoldOutcome::Unchanged) => report.unchanged += 1,
                Ok(FoldOutcome::Dropped) => report.dropped += 1,
                Err(e) => {
                    report.fold_failures += 1;
                    if e.is_document_scoped() {
                        warn!(document_id = %doc.id, error = %e, "Fold failed, will retry next sweep");
                    } else {
                        error!(document_id = %doc.id, error = %e, "Fold failed, will retry next sweep");
                    }
                    let created = doc.record.created_at;
                    earliest_failure = Some(earliest_failure.map_or(created, |t| t.min(created)));
                }
            }
        }

        // Documents normalized by a concurrent sweep may carry a timestamp up
        // to one document timeout older than their commit. Failed documents
        // must stay inside the next sweep's window too.
        let settled = fold_started - self.in_flight;
        let watermark = earliest_failure.map_or(settled, |t| t.min(settled));
        self.store
            .advance_watermark(ENTRIES_BUILDER_SWEEP, watermark)
            .await?;
        report.watermark = Some(watermark);

        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_sweep(ENTRIES_BUILDER_SWEEP, elapsed);
        info!(
            parsed = report.parsed,
            skipped = report.skipped,
            created = report.created,
            merged = report.merged,
            unchanged = report.unchanged,
            absorbed = report.absorbed,
            dropped = report.dropped,
            failures = report.parse_failures + report.fold_failures,
            duration_secs = elapsed,
            "Entries sweep complete"
        );

        Ok(report)
    }

    /// Phase 1: bring every normalized document up to date with its raw record.
    pub async fn parse_pending(&self, report: &mut SweepReport) -> Result<()> {
        let records = self.store.list_raw_records().await?;
        debug!(records = records.len(), "Checking raw records");

        let mut results = stream::iter(records)
            .map(|raw| async move {
                let outcome = self.parse_record(&raw).await;
                (raw, outcome)
            })
            .buffer_unordered(self.workers);

        while let Some((raw, outcome)) = results.next().await {
            match outcome {
                Ok(ParseOutcome::Parsed) => report.parsed += 1,
                Ok(ParseOutcome::Skipped) => report.skipped += 1,
                Err(IngestionError::UnknownOrigin(origin)) => {
                    report.skipped += 1;
                    warn!(raw_id = %raw.id, origin = %origin, "No adapter for origin, skipping");
                }
                Err(e) => {
                    report.parse_failures += 1;
                    metrics::record_parsed(&raw.origin, false);
                    warn!(
                        raw_id = %raw.id,
                        origin = %raw.origin,
                        source_key = %raw.source_key,
                        error = %e,
                        "Parse failed, will retry next sweep"
                    );
                }
            }
        }

        metrics::record_skipped(report.skipped);
        Ok(())
    }

    #[instrument(skip(self, raw), fields(raw_id = %raw.id, origin = %raw.origin))]
    pub async fn parse_record(&self, raw: &RawRecord) -> Result<ParseOutcome> {
        let adapter = self
            .adapters
            .get(&raw.origin)
            .ok_or_else(|| IngestionError::UnknownOrigin(raw.origin.clone()))?;

        let existing = self.store.find_normalized(raw.id).await?;
        if !needs_reparse(raw, existing.as_ref(), adapter.latest_version()) {
            return Ok(ParseOutcome::Skipped);
        }

        let record = adapter.parse(raw)?;
        let document = NormalizedDocument::new(raw.id, record);
        self.store
            .swap_normalized(existing.map(|d| d.id), &document)
            .await?;

        metrics::record_parsed(&raw.origin, true);
        debug!(document_id = %document.id, "Normalized");
        Ok(ParseOutcome::Parsed)
    }

    async fn fold_with_timeout(&self, doc: &NormalizedDocument) -> Result<Folded> {
        match tokio::time::timeout(self.document_timeout, self.fold_document(doc)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(IngestionError::Timeout {
                id: doc.id,
                timeout_ms: self.document_timeout.as_millis() as u64,
            }),
        }
    }

    /// Resolve, fold and commit one document, re-running the whole unit when
    /// another writer got there first.
    #[instrument(skip(self, doc), fields(document_id = %doc.id, origin = %doc.record.origin))]
    pub async fn fold_document(&self, doc: &NormalizedDocument) -> Result<Folded> {
        let started = Instant::now();
        let mut attempts = 0u32;
        let outcome = retry::with_conflict_retry(self.retry, || {
            attempts += 1;
            self.fold_once(doc)
        })
        .await?;
        let conflict_retries = attempts.saturating_sub(1);
        if conflict_retries > 0 {
            debug!(conflict_retries, "Fold settled after conflicts");
        }

        match outcome {
            FoldOutcome::Created => {
                metrics::record_fold(true, 0, started.elapsed().as_secs_f64())
            }
            FoldOutcome::Merged { absorbed } => {
                metrics::record_fold(false, absorbed, started.elapsed().as_secs_f64())
            }
            FoldOutcome::Dropped => metrics::record_dropped(),
            FoldOutcome::Unchanged => {}
        }
        Ok(Folded {
            outcome,
            conflict_retries,
        })
    }

    async fn fold_once(
        &self,
        doc: &NormalizedDocument,
    ) -> scholarmerge_common::Result<FoldOutcome> {
        let candidates = self.resolver.find_candidates(doc).await?;

        if candidates.is_empty() && !self.resolver.may_create(doc) {
            debug!(document_id = %doc.id, "No identifier and no qualifying type, dropping");
            return Ok(FoldOutcome::Dropped);
        }

        let fold = self.engine.fold(doc, &candidates, Utc::now());

        if let [existing] = candidates.as_slice() {
            if fold.survivor.same_content(existing) {
                return Ok(FoldOutcome::Unchanged);
            }
        }

        let created = fold.is_creation();
        let absorbed = fold.absorbed.len();
        let stored = self.store.commit_fold(&fold.survivor, &fold.absorbed).await?;

        if absorbed > 0 {
            info!(
                entry_id = %stored.id,
                absorbed = absorbed,
                "Collapsed duplicate entries"
            );
        }

        if created && !doc.record.has_external_identifier() {
            let twins = self.collapse_title_twins(doc).await?;
            if twins > 0 {
                return Ok(FoldOutcome::Merged { absorbed: twins });
            }
        }

        Ok(if created {
            FoldOutcome::Created
        } else {
            FoldOutcome::Merged { absorbed }
        })
    }

    /// No unique index guards a title, so two workers can each create an
    /// entry for the same identifier-less paper. Whichever commits last sees
    /// both here and folds them together. Returns how many were absorbed.
    async fn collapse_title_twins(
        &self,
        doc: &NormalizedDocument,
    ) -> scholarmerge_common::Result<usize> {
        let candidates = self.resolver.find_candidates(doc).await?;
        if candidates.len() < 2 {
            return Ok(0);
        }

        let fold = self.engine.fold(doc, &candidates, Utc::now());
        let stored = self.store.commit_fold(&fold.survivor, &fold.absorbed).await?;
        info!(
            entry_id = %stored.id,
            absorbed = fold.absorbed.len(),
            "Collapsed entries created concurrently"
        );
        Ok(fold.absorbed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::CanonicalJsonAdapter;
    use async_trait::async_trait;
    use scholarmerge_common::config::SourceConfig;
    use scholarmerge_common::db::{IdentifierQuery, MemoryStore};
    use scholarmerge_common::models::{
        DocumentType, Embedding, EntryDocument, PaperRecord, SimilarAbstract,
    };
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Commits `rival` just before the first creation it sees, as if another
    /// worker resolved the same paper a moment earlier.
    struct Contended {
        inner: MemoryStore,
        rival: Mutex<Option<EntryDocument>>,
    }

    impl Contended {
        fn new(rival: EntryDocument) -> Self {
            Self {
                inner: MemoryStore::new(),
                rival: Mutex::new(Some(rival)),
            }
        }
    }

    #[async_trait]
    impl DocumentStore for Contended {
        async fn upsert_raw_record(&self, record: RawRecord) -> scholarmerge_common::Result<RawRecord> {
            self.inner.upsert_raw_record(record).await
        }

        async fn list_raw_records(&self) -> scholarmerge_common::Result<Vec<RawRecord>> {
            self.inner.list_raw_records().await
        }

        async fn find_normalized(
            &self,
            raw_id: Uuid,
        ) -> scholarmerge_common::Result<Option<NormalizedDocument>> {
            self.inner.find_normalized(raw_id).await
        }

        async fn swap_normalized(
            &self,
            previous: Option<Uuid>,
            document: &NormalizedDocument,
        ) -> scholarmerge_common::Result<()> {
            self.inner.swap_normalized(previous, document).await
        }

        async fn normalized_since(
            &self,
            since: Option<DateTime<Utc>>,
        ) -> scholarmerge_common::Result<Vec<NormalizedDocument>> {
            self.inner.normalized_since(since).await
        }

        async fn find_by_identifiers(
            &self,
            query: &IdentifierQuery,
        ) -> scholarmerge_common::Result<Vec<EntryDocument>> {
            self.inner.find_by_identifiers(query).await
        }

        async fn get_entry(&self, id: Uuid) -> scholarmerge_common::Result<Option<EntryDocument>> {
            self.inner.get_entry(id).await
        }

        async fn commit_fold(
            &self,
            survivor: &EntryDocument,
            absorbed: &[EntryDocument],
        ) -> scholarmerge_common::Result<EntryDocument> {
            if survivor.is_new() {
                let rival = self.rival.lock().unwrap().take();
                if let Some(rival) = rival {
                    self.inner.upsert(&rival).await?;
                }
            }
            self.inner.commit_fold(survivor, absorbed).await
        }

        async fn delete(&self, id: Uuid) -> scholarmerge_common::Result<bool> {
            self.inner.delete(id).await
        }

        async fn list_entries(&self) -> scholarmerge_common::Result<Vec<EntryDocument>> {
            self.inner.list_entries().await
        }

        async fn entries_with_abstract(&self) -> scholarmerge_common::Result<Vec<EntryDocument>> {
            self.inner.entries_with_abstract().await
        }

        async fn set_embeddings(
            &self,
            id: Uuid,
            abstract_embedding: Option<&Embedding>,
            title_embedding: Option<&Embedding>,
        ) -> scholarmerge_common::Result<()> {
            self.inner
                .set_embeddings(id, abstract_embedding, title_embedding)
                .await
        }

        async fn offer_neighbors(
            &self,
            id: Uuid,
            offers: &[SimilarAbstract],
            capacity: usize,
        ) -> scholarmerge_common::Result<bool> {
            self.inner.offer_neighbors(id, offers, capacity).await
        }

        async fn clear_neighbors(&self) -> scholarmerge_common::Result<u64> {
            self.inner.clear_neighbors().await
        }

        async fn mark_dirty(&self, id: Uuid) -> scholarmerge_common::Result<()> {
            self.inner.mark_dirty(id).await
        }

        async fn clear_dirty(&self, id: Uuid) -> scholarmerge_common::Result<()> {
            self.inner.clear_dirty(id).await
        }

        async fn list_unsynced(&self, limit: usize) -> scholarmerge_common::Result<Vec<EntryDocument>> {
            self.inner.list_unsynced(limit).await
        }

        async fn watermark(&self, name: &str) -> scholarmerge_common::Result<Option<DateTime<Utc>>> {
            self.inner.watermark(name).await
        }

        async fn advance_watermark(
            &self,
            name: &str,
            at: DateTime<Utc>,
        ) -> scholarmerge_common::Result<()> {
            self.inner.advance_watermark(name, at).await
        }
    }

    fn rival(record: PaperRecord) -> EntryDocument {
        EntryDocument::new(PaperRecord {
            origin: "bulk_dump".into(),
            ..record
        })
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.pipeline.workers = 4;
        config.pipeline.sources = ["human_submission", "publisher", "bulk_dump"]
            .into_iter()
            .map(|origin| SourceConfig {
                origin: origin.to_string(),
                source_display: origin.to_string(),
                latest_version: 1,
            })
            .collect();
        config
    }

    async fn load(store: &MemoryStore, origin: &str, key: &str, payload: serde_json::Value) {
        store
            .upsert_raw_record(RawRecord::new(origin, key, payload, Utc::now()))
            .await
            .unwrap();
    }

    fn builder(store: Arc<MemoryStore>) -> EntriesBuilder {
        EntriesBuilder::new(store, &config())
    }

    #[tokio::test]
    async fn test_priority_example() {
        let store = Arc::new(MemoryStore::new());
        load(
            &store,
            "bulk_dump",
            "b1",
            json!({"pmcid": "PMC1", "title": "X", "abstract": "", "keywords": ["a"]}),
        )
        .await;
        let builder = builder(store.clone());
        builder.sweep().await.unwrap();

        load(
            &store,
            "human_submission",
            "h1",
            json!({"title": "X", "abstract": "A"}),
        )
        .await;
        let report = builder.sweep().await.unwrap();
        assert_eq!(report.merged, 1);

        let entries = store.list_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        let r = &entries[0].record;
        assert_eq!(r.title.as_deref(), Some("X"));
        assert_eq!(r.abstract_text.as_deref(), Some("A"));
        assert_eq!(r.keywords, vec!["a"]);
        assert_eq!(entries[0].source_documents.len(), 2);
    }

    #[tokio::test]
    async fn test_title_fallback_example() {
        let store = Arc::new(MemoryStore::new());
        load(
            &store,
            "bulk_dump",
            "t1",
            json!({"title": "Y", "abstract": "Low", "document_type": "clinical_trial"}),
        )
        .await;
        load(
            &store,
            "publisher",
            "t2",
            json!({"title": "Y", "abstract": "High", "document_type": "clinical_trial"}),
        )
        .await;

        builder(store.clone()).sweep().await.unwrap();

        let entries = store.list_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record.abstract_text.as_deref(), Some("High"));
        assert_eq!(entries[0].source_documents.len(), 2);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        load(
            &store,
            "publisher",
            "p1",
            json!({
                "doi": "10.1/x.v2",
                "title": "Journal Pre-proof Study",
                "abstract": "Abstract: Findings",
                "keywords": "virus",
                "is_covid19": true,
            }),
        )
        .await;
        load(
            &store,
            "bulk_dump",
            "b1",
            json!({"doi": "https://doi.org/10.1/X", "keywords": ["virus", "mask"], "pubmed_id": "9"}),
        )
        .await;

        let builder = builder(store.clone());
        builder.sweep().await.unwrap();
        builder.sweep().await.unwrap();
        let first = store.list_entries().await.unwrap();

        let report = builder.rebuild().await.unwrap();
        assert_eq!(report.parsed, 0);
        assert_eq!(report.created + report.merged, 0);
        let second = store.list_entries().await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
        let entry = &first[0];
        assert_eq!(entry.record.doi.as_deref(), Some("10.1/x"));
        assert_eq!(entry.record.title.as_deref(), Some("Study"));
        assert!(entry.is_pre_proof);
        assert_eq!(entry.record.is_covid19, Some(true));
        assert_eq!(entry.record.keywords, vec!["virus", "mask"]);
    }

    #[tokio::test]
    async fn test_noise_is_dropped_and_unknown_origin_skipped() {
        let store = Arc::new(MemoryStore::new());
        load(&store, "publisher", "n1", json!({"title": "Untitled"})).await;
        load(&store, "scraper", "s1", json!({"doi": "10.1/s"})).await;

        let report = builder(store.clone()).sweep().await.unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(report.skipped, 1);
        assert!(store.list_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_adapter_failure_does_not_abort_batch() {
        let store = Arc::new(MemoryStore::new());
        load(&store, "publisher", "bad", json!(["not", "an", "object"])).await;
        load(&store, "publisher", "good", json!({"doi": "10.1/good"})).await;

        let report = builder(store.clone()).sweep().await.unwrap();
        assert_eq!(report.parse_failures, 1);
        assert_eq!(report.created, 1);
        assert_eq!(store.list_entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reparse_keeps_back_references() {
        let store = Arc::new(MemoryStore::new());
        load(&store, "publisher", "p1", json!({"doi": "10.1/x", "title": "Old"})).await;
        let builder = builder(store.clone());
        builder.sweep().await.unwrap();

        // Source changed after it was normalized
        store
            .upsert_raw_record(RawRecord::new(
                "publisher",
                "p1",
                json!({"doi": "10.1/x", "title": "New"}),
                Utc::now() + chrono::Duration::seconds(5),
            ))
            .await
            .unwrap();
        let report = builder.sweep().await.unwrap();
        assert_eq!(report.parsed, 1);

        let entries = store.list_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record.title.as_deref(), Some("New"));
        assert_eq!(entries[0].source_documents.len(), 1);
    }

    #[tokio::test]
    async fn test_adapter_version_bump_reparses() {
        let store = Arc::new(MemoryStore::new());
        load(&store, "publisher", "p1", json!({"doi": "10.1/v"})).await;
        builder(store.clone()).sweep().await.unwrap();

        let mut adapters = AdapterRegistry::new();
        adapters.register(Arc::new(CanonicalJsonAdapter::new(&SourceConfig {
            origin: "publisher".into(),
            source_display: "Publisher".into(),
            latest_version: 2,
        })));
        let upgraded = builder(store.clone()).with_adapters(adapters);

        let report = upgraded.sweep().await.unwrap();
        assert_eq!(report.parsed, 1);
        let entries = store.list_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record.version, 2);
        assert_eq!(entries[0].record.source_display, "Publisher");

        let report = upgraded.sweep().await.unwrap();
        assert_eq!(report.parsed, 0);
    }

    #[tokio::test]
    async fn test_uniqueness_holds_under_parallel_folds() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..20 {
            let origin = ["publisher", "bulk_dump"][i % 2];
            load(
                &store,
                origin,
                &format!("k{i}"),
                json!({"doi": format!("10.1/p{}", i % 5), "pmcid": format!("PMC{}", i % 5)}),
            )
            .await;
        }

        builder(store.clone()).sweep().await.unwrap();

        let entries = store.list_entries().await.unwrap();
        let dois: HashSet<_> = entries.iter().filter_map(|e| e.record.doi.clone()).collect();
        let pmcids: HashSet<_> = entries.iter().filter_map(|e| e.record.pmcid.clone()).collect();
        assert_eq!(entries.len(), 5);
        assert_eq!(dois.len(), entries.len());
        assert_eq!(pmcids.len(), entries.len());
    }

    #[tokio::test]
    async fn test_duplicate_entries_are_collapsed() {
        let store = Arc::new(MemoryStore::new());
        let a = store
            .upsert(&EntryDocument::new(PaperRecord {
                doi: Some("10.1/d".into()),
                ..Default::default()
            }))
            .await
            .unwrap();
        let b = store
            .upsert(&EntryDocument::new(PaperRecord {
                pubmed_id: Some("42".into()),
                ..Default::default()
            }))
            .await
            .unwrap();

        load(
            &store,
            "publisher",
            "both",
            json!({"doi": "10.1/d", "pubmed_id": "42"}),
        )
        .await;
        let report = builder(store.clone()).sweep().await.unwrap();
        assert_eq!(report.absorbed, 1);

        let entries = store.list_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, a.id);
        assert!(store.get_entry(b.id).await.unwrap().is_none());
        assert_eq!(entries[0].record.pubmed_id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_watermark_advances() {
        let store = Arc::new(MemoryStore::new());
        let before = Utc::now();
        let report = builder(store.clone()).sweep().await.unwrap();
        let mark = store.watermark(ENTRIES_BUILDER_SWEEP).await.unwrap();
        assert_eq!(mark, report.watermark);
        assert!(mark.unwrap() >= before - config().in_flight_window());
        assert!(mark.unwrap() < before);
    }

    #[tokio::test]
    async fn test_late_commit_is_folded_next_sweep() {
        let store = Arc::new(MemoryStore::new());
        load(&store, "publisher", "p1", json!({"doi": "10.1/early"})).await;
        let builder = builder(store.clone());
        let before = Utc::now();
        builder.sweep().await.unwrap();

        // Normalized by a concurrent sweep that stamped it before this one
        // started but committed after this one read the store.
        let late = NormalizedDocument::new(
            Uuid::new_v4(),
            PaperRecord {
                doi: Some("10.1/late".into()),
                origin: "publisher".into(),
                created_at: before - chrono::Duration::seconds(1),
                ..Default::default()
            },
        );
        store.swap_normalized(None, &late).await.unwrap();

        let report = builder.sweep().await.unwrap();
        assert_eq!(report.created, 1);
        let entries = store.list_entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries
            .iter()
            .any(|e| e.record.doi.as_deref() == Some("10.1/late")));
    }

    #[tokio::test]
    async fn test_identifier_race_retries_into_merge() {
        let store = Arc::new(Contended::new(rival(PaperRecord {
            doi: Some("10.1/c".into()),
            ..Default::default()
        })));
        let rival_id = store.rival.lock().unwrap().as_ref().unwrap().id;
        store
            .upsert_raw_record(RawRecord::new(
                "publisher",
                "c1",
                json!({"doi": "10.1/c", "title": "Contended"}),
                Utc::now(),
            ))
            .await
            .unwrap();

        let report = EntriesBuilder::new(store.clone(), &config()).sweep().await.unwrap();
        assert_eq!(report.created, 0);
        assert_eq!(report.merged, 1);
        assert!(report.conflict_retries >= 1);

        let entries = store.list_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, rival_id);
        assert_eq!(entries[0].record.title.as_deref(), Some("Contended"));
    }

    #[tokio::test]
    async fn test_concurrent_title_creations_collapse() {
        let store = Arc::new(Contended::new(rival(PaperRecord {
            title: Some("Y".into()),
            abstract_text: Some("Other".into()),
            document_type: DocumentType::ClinicalTrial,
            ..Default::default()
        })));
        let rival_id = store.rival.lock().unwrap().as_ref().unwrap().id;
        store
            .upsert_raw_record(RawRecord::new(
                "publisher",
                "t2",
                json!({"title": "Y", "abstract": "High", "document_type": "clinical_trial"}),
                Utc::now(),
            ))
            .await
            .unwrap();

        let report = EntriesBuilder::new(store.clone(), &config()).sweep().await.unwrap();
        assert_eq!(report.absorbed, 1);

        let entries = store.list_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, rival_id);
        assert_eq!(entries[0].record.abstract_text.as_deref(), Some("High"));
    }

    #[tokio::test]
    async fn test_real_date_survives_dateless_submission() {
        let store = Arc::new(MemoryStore::new());
        load(&store, "human_submission", "h1", json!({"doi": "10.1/d", "title": "T"})).await;
        let builder = builder(store.clone());
        builder.sweep().await.unwrap();

        load(
            &store,
            "bulk_dump",
            "b1",
            json!({"doi": "10.1/d", "publication_date": "2020-03-01T00:00:00Z", "has_year": true}),
        )
        .await;
        builder.sweep().await.unwrap();

        let entries = store.list_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        let r = &entries[0].record;
        assert_eq!(
            r.publication_date.map(|d| d.date_naive()),
            chrono::NaiveDate::from_ymd_opt(2020, 3, 1)
        );
        assert!(r.has_year);
        assert_eq!(r.title.as_deref(), Some("T"));
    }
}
