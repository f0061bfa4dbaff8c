//! Incremental abstract similarity index
//!
//! Entries touched since the watermark are "new", the rest "old". A sweep
//! compares new against old and new against new entries with a smaller
//! ordinal, so each unordered pair is scored once and the old-old quadrant,
//! already settled by earlier sweeps, is never revisited. Scores above the
//! near-duplicate threshold describe the same paper and are dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use scholarmerge_common::config::AppConfig;
use scholarmerge_common::db::{DocumentStore, ABSTRACT_SIMILARITY_SWEEP};
use scholarmerge_common::embeddings::Embedder;
use scholarmerge_common::metrics;
use scholarmerge_common::models::{Embedding, SimilarAbstract};
use scholarmerge_common::neighbors::NeighborHeap;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::EmbeddingCache;
use crate::errors::Result;

/// One indexable abstract
#[derive(Debug, Clone)]
pub struct IndexedAbstract {
    pub id: Uuid,
    pub ordinal: i64,
    pub doi: Option<String>,
    pub embedding: Embedding,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub entries: u64,
    pub new_entries: u64,
    pub excluded: u64,
    pub embedding_failures: u64,
    pub compared: u64,
    pub near_duplicates: u64,
    pub lists_written: u64,
    pub watermark: Option<DateTime<Utc>>,
}

/// Per-target neighbor candidates gathered off the async runtime.
#[derive(Default)]
struct Scored {
    heaps: HashMap<Uuid, NeighborHeap>,
    compared: u64,
    near_duplicates: u64,
}

impl Scored {
    fn offer(&mut self, capacity: usize, target: Uuid, neighbor: &IndexedAbstract, similarity: f32) {
        self.heaps
            .entry(target)
            .or_insert_with(|| NeighborHeap::new(capacity))
            .offer(SimilarAbstract {
                entry_id: neighbor.id,
                doi: neighbor.doi.clone(),
                similarity,
            });
    }

    fn absorb(&mut self, capacity: usize, other: Scored) {
        self.compared += other.compared;
        self.near_duplicates += other.near_duplicates;
        for (target, heap) in other.heaps {
            let into = self
                .heaps
                .entry(target)
                .or_insert_with(|| NeighborHeap::new(capacity));
            for neighbor in heap.into_sorted_vec() {
                into.offer(neighbor);
            }
        }
    }
}

/// Score `new[range]` against every old abstract and every new abstract
/// with a smaller ordinal. `new` is sorted by ordinal.
fn score_shard(
    new: &[IndexedAbstract],
    old: &[IndexedAbstract],
    range: std::ops::Range<usize>,
    capacity: usize,
    threshold: f32,
) -> Scored {
    let mut scored = Scored::default();
    for i in range {
        let a = &new[i];
        for b in old.iter().chain(&new[..i]) {
            scored.compared += 1;
            let similarity = a.embedding.cosine(&b.embedding);
            if similarity >= threshold {
                scored.near_duplicates += 1;
                continue;
            }
            scored.offer(capacity, a.id, b, similarity);
            scored.offer(capacity, b.id, a, similarity);
        }
    }
    scored
}

pub struct SimilarityIndex {
    store: Arc<dyn DocumentStore>,
    cache: EmbeddingCache,
    top_n: usize,
    threshold: f32,
    workers: usize,
    in_flight: chrono::Duration,
}

impl SimilarityIndex {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn Embedder>,
        config: &AppConfig,
    ) -> Self {
        Self {
            cache: EmbeddingCache::new(store.clone(), embedder),
            store,
            top_n: config.similarity.top_n,
            threshold: config.similarity.near_duplicate_threshold,
            workers: config.pipeline.workers.max(1),
            in_flight: config.in_flight_window(),
        }
    }

    /// Incremental sweep from the stored watermark
    pub async fn sweep(&self) -> Result<SweepReport> {
        let since = self.store.watermark(ABSTRACT_SIMILARITY_SWEEP).await?;
        self.update(since).await
    }

    /// Drop every neighbor list and score the whole corpus again.
    pub async fn rebuild(&self) -> Result<SweepReport> {
        let cleared = self.store.clear_neighbors().await?;
        info!(cleared, "Neighbor lists cleared");
        self.update(None).await
    }

    /// Fold entries changed at or after `since` into the neighbor lists.
    pub async fn update(&self, since: Option<DateTime<Utc>>) -> Result<SweepReport> {
        let started_at = Utc::now();
        let started = Instant::now();
        let mut report = SweepReport::default();

        let entries = self.store.entries_with_abstract().await?;
        report.entries = entries.len() as u64;
        info!(since = ?since, entries = entries.len(), model = %self.cache.model(), "Starting similarity sweep");

        let is_new = |updated: DateTime<Utc>| since.map_or(true, |s| updated >= s);

        let mut prepared = stream::iter(entries)
            .map(|entry| async move {
                let outcome = self.cache.ensure(&entry).await;
                (entry, outcome)
            })
            .buffer_unordered(self.workers);

        let mut new = Vec::new();
        let mut old = Vec::new();
        let mut earliest_failure: Option<DateTime<Utc>> = None;

        while let Some((entry, outcome)) = prepared.next().await {
            let embedding = match outcome {
                Ok(Some(embedding)) => embedding,
                Ok(None) => {
                    report.excluded += 1;
                    continue;
                }
                Err(e) if e.is_embedding_failure() => {
                    report.embedding_failures += 1;
                    warn!(entry_id = %entry.id, error = %e, "Embedding failed, will retry next sweep");
                    let updated = entry.record.last_updated;
                    earliest_failure = Some(earliest_failure.map_or(updated, |t| t.min(updated)));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let indexed = IndexedAbstract {
                id: entry.id,
                ordinal: entry.ordinal,
                doi: entry.record.doi.clone(),
                embedding,
            };
            if is_new(entry.record.last_updated) {
                new.push(indexed);
            } else {
                old.push(indexed);
            }
        }

        new.sort_by_key(|a| a.ordinal);
        report.new_entries = new.len() as u64;

        let scored = self.score(new, old).await?;
        report.compared = scored.compared;
        report.near_duplicates = scored.near_duplicates;
        metrics::record_pairs(scored.compared, scored.near_duplicates);

        report.lists_written = self.persist(scored.heaps).await?;
        metrics::record_neighbor_writes(report.lists_written);

        // A fold stamps `last_updated` before it commits, so the watermark
        // trails the sweep start by the in-flight window. Entries that failed
        // to embed must stay "new" for the next sweep.
        let settled = started_at - self.in_flight;
        let watermark = earliest_failure.map_or(settled, |t| t.min(settled));
        self.store
            .advance_watermark(ABSTRACT_SIMILARITY_SWEEP, watermark)
            .await?;
        report.watermark = Some(watermark);

        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_sweep(ABSTRACT_SIMILARITY_SWEEP, elapsed);
        info!(
            new_entries = report.new_entries,
            compared = report.compared,
            near_duplicates = report.near_duplicates,
            lists_written = report.lists_written,
            excluded = report.excluded,
            duration_secs = elapsed,
            "Similarity sweep complete"
        );

        Ok(report)
    }

    /// Split the new set into shards and score them on the blocking pool.
    async fn score(&self, new: Vec<IndexedAbstract>, old: Vec<IndexedAbstract>) -> Result<Scored> {
        let new = Arc::new(new);
        let old = Arc::new(old);
        let shard = new.len().div_ceil(self.workers).max(1);

        let mut tasks = Vec::new();
        for begin in (0..new.len()).step_by(shard) {
            let end = (begin + shard).min(new.len());
            let (new, old) = (new.clone(), old.clone());
            let (capacity, threshold) = (self.top_n, self.threshold);
            tasks.push(tokio::task::spawn_blocking(move || {
                score_shard(&new, &old, begin..end, capacity, threshold)
            }));
        }

        let mut scored = Scored::default();
        for task in tasks {
            scored.absorb(self.top_n, task.await?);
        }
        Ok(scored)
    }

    /// Offer every gathered list to the store; returns how many changed.
    async fn persist(&self, heaps: HashMap<Uuid, NeighborHeap>) -> Result<u64> {
        let capacity = self.top_n;
        let mut writes = stream::iter(heaps)
            .map(|(id, heap)| async move {
                let offers = heap.into_sorted_vec();
                self.store.offer_neighbors(id, &offers, capacity).await
            })
            .buffer_unordered(self.workers);

        let mut written = 0;
        while let Some(outcome) = writes.next().await {
            match outcome {
                Ok(true) => written += 1,
                Ok(false) => {}
                // Absorbed by a concurrent merge; its neighbors went with it.
                Err(scholarmerge_common::AppError::EntryNotFound { id }) => {
                    debug!(entry_id = %id, "Entry vanished before neighbors were written");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use scholarmerge_common::db::MemoryStore;
    use scholarmerge_common::models::{EntryDocument, PaperRecord};

    /// Abstracts of the form "v x y" embed to the vector (x, y).
    struct Literal;

    #[async_trait]
    impl Embedder for Literal {
        async fn embed(&self, text: &str) -> scholarmerge_common::Result<Vec<f32>> {
            Ok(text
                .split_whitespace()
                .skip(1)
                .filter_map(|v| v.parse().ok())
                .collect())
        }

        fn model_name(&self) -> &str {
            "literal"
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn config(top_n: usize) -> AppConfig {
        let mut config = AppConfig::default();
        config.similarity.top_n = top_n;
        config.pipeline.workers = 3;
        config
    }

    fn index(store: Arc<MemoryStore>, top_n: usize) -> SimilarityIndex {
        SimilarityIndex::new(store, Arc::new(Literal), &config(top_n))
    }

    async fn add(store: &MemoryStore, x: f32, y: f32, updated: DateTime<Utc>) -> Uuid {
        store
            .upsert(&EntryDocument::new(PaperRecord {
                abstract_text: Some(format!("v {x} {y}")),
                last_updated: updated,
                ..Default::default()
            }))
            .await
            .unwrap()
            .id
    }

    fn neighbor_ids(entry: &EntryDocument) -> Vec<Uuid> {
        entry.similar_abstracts.iter().map(|n| n.entry_id).collect()
    }

    #[tokio::test]
    async fn test_near_duplicates_never_listed() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let a = add(&store, 1.0, 0.0, now).await;
        // cos(a, b) = 0.999
        let b = add(&store, 0.999, 0.044_710_2, now).await;
        let c = add(&store, 0.6, 0.8, now).await;

        let report = index(store.clone(), 3).update(None).await.unwrap();
        assert_eq!(report.compared, 3);
        assert_eq!(report.near_duplicates, 1);

        let a_entry = store.get_entry(a).await.unwrap().unwrap();
        let b_entry = store.get_entry(b).await.unwrap().unwrap();
        assert_eq!(neighbor_ids(&a_entry), vec![c]);
        assert_eq!(neighbor_ids(&b_entry), vec![c]);
        let c_entry = store.get_entry(c).await.unwrap().unwrap();
        assert_eq!(c_entry.similar_abstracts.len(), 2);
    }

    #[tokio::test]
    async fn test_lists_hold_the_top_n() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let target = add(&store, 1.0, 0.0, now).await;
        let mut by_angle = Vec::new();
        for degrees in [10.0f32, 20.0, 30.0, 40.0, 50.0, 60.0] {
            let r = degrees.to_radians();
            by_angle.push(add(&store, r.cos(), r.sin(), now).await);
        }

        index(store.clone(), 3).update(None).await.unwrap();

        for entry in store.list_entries().await.unwrap() {
            assert!(entry.similar_abstracts.len() <= 3);
            let sims: Vec<f32> = entry.similar_abstracts.iter().map(|n| n.similarity).collect();
            assert!(sims.windows(2).all(|w| w[0] >= w[1]));
        }
        let target = store.get_entry(target).await.unwrap().unwrap();
        assert_eq!(neighbor_ids(&target), by_angle[..3].to_vec());
    }

    #[tokio::test]
    async fn test_incremental_update_skips_old_pairs() {
        let store = Arc::new(MemoryStore::new());
        let since = Utc::now();
        let old_time = since - Duration::hours(1);
        for degrees in [0.0f32, 15.0, 30.0, 45.0] {
            let r = degrees.to_radians();
            add(&store, r.cos(), r.sin(), old_time).await;
        }
        let idx = index(store.clone(), 2);
        idx.update(None).await.unwrap();

        let new_a = add(&store, 0.0, 1.0, since + Duration::seconds(1)).await;
        add(&store, 60f32.to_radians().cos(), 60f32.to_radians().sin(), since).await;

        let report = idx.update(Some(since)).await.unwrap();
        assert_eq!(report.new_entries, 2);
        // new x old (2 * 4) plus the single new x new pair
        assert_eq!(report.compared, 9);

        let a = store.get_entry(new_a).await.unwrap().unwrap();
        assert_eq!(a.similar_abstracts.len(), 2);
        assert!(a.similar_abstracts[0].similarity > a.similar_abstracts[1].similarity);
    }

    #[tokio::test]
    async fn test_sweep_advances_watermark_and_rebuild_recomputes() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        add(&store, 1.0, 0.0, now - Duration::minutes(5)).await;
        add(&store, 0.0, 1.0, now - Duration::minutes(5)).await;
        let idx = index(store.clone(), 3);

        let first = idx.sweep().await.unwrap();
        assert_eq!(first.compared, 1);
        assert_eq!(
            store.watermark(ABSTRACT_SIMILARITY_SWEEP).await.unwrap(),
            first.watermark
        );

        let second = idx.sweep().await.unwrap();
        assert_eq!(second.new_entries, 0);
        assert_eq!(second.compared, 0);

        let rebuilt = idx.rebuild().await.unwrap();
        assert_eq!(rebuilt.compared, 1);
        assert_eq!(rebuilt.lists_written, 2);
    }

    #[tokio::test]
    async fn test_late_commit_is_scored_next_sweep() {
        let store = Arc::new(MemoryStore::new());
        let before = Utc::now();
        let a = add(&store, 1.0, 0.0, before - Duration::minutes(5)).await;
        let b = add(&store, 0.0, 1.0, before - Duration::minutes(5)).await;
        let idx = index(store.clone(), 3);
        let first = idx.sweep().await.unwrap();
        assert!(first.watermark.unwrap() < before);

        // Stamped before the first sweep started, committed after it read
        let late = add(&store, 0.6, 0.8, before - Duration::seconds(1)).await;

        let second = idx.sweep().await.unwrap();
        assert_eq!(second.new_entries, 1);
        assert_eq!(second.compared, 2);
        let late = store.get_entry(late).await.unwrap().unwrap();
        let mut ids = neighbor_ids(&late);
        ids.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_neighbor_change_clears_synced() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let a = add(&store, 1.0, 0.0, now).await;
        add(&store, 0.0, 1.0, now).await;
        store.clear_dirty(a).await.unwrap();

        index(store.clone(), 3).update(None).await.unwrap();
        assert!(!store.get_entry(a).await.unwrap().unwrap().synced);
    }
}
