//! Metrics and observability utilities
//!
//! Counters and histograms for the entries builder and the similarity
//! index, under a shared naming prefix.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics prefix for all ScholarMerge metrics
pub const METRICS_PREFIX: &str = "scholarmerge";

/// Buckets for whole-sweep duration (in seconds)
pub const SWEEP_BUCKETS: &[f64] = &[
    1.0,    // 1s
    5.0,    // 5s
    15.0,   // 15s
    60.0,   // 1m
    300.0,  // 5m
    900.0,  // 15m
    3600.0, // 1h
];

/// Buckets for one document's resolve/merge/commit (in seconds)
pub const MERGE_BUCKETS: &[f64] = &[
    0.001, // 1ms
    0.005, // 5ms
    0.010, // 10ms
    0.050, // 50ms
    0.100, // 100ms
    0.500, // 500ms
    1.000, // 1s
    5.000, // 5s
];

fn name(suffix: &str) -> String {
    format!("{}_{}", METRICS_PREFIX, suffix)
}

/// Register all metric descriptions
pub fn register_metrics() {
    // Entries builder
    describe_counter!(name("documents_parsed_total"), Unit::Count, "Raw records normalized");
    describe_counter!(name("adapter_failures_total"), Unit::Count, "Adapter parse failures");
    describe_counter!(
        name("documents_skipped_total"),
        Unit::Count,
        "Raw records the scheduler did not reparse"
    );
    describe_counter!(name("entries_created_total"), Unit::Count, "Entries created");
    describe_counter!(name("entries_merged_total"), Unit::Count, "Documents merged into an entry");
    describe_counter!(
        name("entries_absorbed_total"),
        Unit::Count,
        "Duplicate entries collapsed into a survivor"
    );
    describe_counter!(
        name("documents_dropped_total"),
        Unit::Count,
        "Documents without an identifier or qualifying type"
    );
    describe_counter!(
        name("conflict_retries_total"),
        Unit::Count,
        "Units of work retried after a store conflict"
    );
    describe_histogram!(
        name("merge_duration_seconds"),
        Unit::Seconds,
        "Per-document resolve/merge/commit latency"
    );

    // Similarity index
    describe_counter!(name("embeddings_computed_total"), Unit::Count, "Embeddings computed");
    describe_counter!(name("embedding_failures_total"), Unit::Count, "Texts that could not be embedded");
    describe_counter!(name("pairs_compared_total"), Unit::Count, "Abstract pairs compared");
    describe_counter!(
        name("near_duplicates_total"),
        Unit::Count,
        "Pairs discarded as near-duplicates"
    );
    describe_counter!(name("neighbor_lists_written_total"), Unit::Count, "Neighbor lists persisted");

    describe_histogram!(name("sweep_duration_seconds"), Unit::Seconds, "Sweep duration");

    tracing::info!("Metrics registered");
}

pub fn record_parsed(origin: &str, success: bool) {
    if success {
        counter!(name("documents_parsed_total"), "origin" => origin.to_string()).increment(1);
    } else {
        counter!(name("adapter_failures_total"), "origin" => origin.to_string()).increment(1);
    }
}

pub fn record_skipped(count: u64) {
    counter!(name("documents_skipped_total")).increment(count);
}

pub fn record_dropped() {
    counter!(name("documents_dropped_total")).increment(1);
}

/// One committed fold
pub fn record_fold(created: bool, absorbed: usize, duration_secs: f64) {
    if created {
        counter!(name("entries_created_total")).increment(1);
    } else {
        counter!(name("entries_merged_total")).increment(1);
    }
    if absorbed > 0 {
        counter!(name("entries_absorbed_total")).increment(absorbed as u64);
    }
    histogram!(name("merge_duration_seconds")).record(duration_secs);
}

pub fn record_conflict_retry() {
    counter!(name("conflict_retries_total")).increment(1);
}

pub fn record_embedding(model: &str, success: bool) {
    if success {
        counter!(name("embeddings_computed_total"), "model" => model.to_string()).increment(1);
    } else {
        counter!(name("embedding_failures_total"), "model" => model.to_string()).increment(1);
    }
}

pub fn record_pairs(compared: u64, near_duplicates: u64) {
    counter!(name("pairs_compared_total")).increment(compared);
    counter!(name("near_duplicates_total")).increment(near_duplicates);
}

pub fn record_neighbor_writes(count: u64) {
    counter!(name("neighbor_lists_written_total")).increment(count);
}

pub fn record_sweep(stage: &str, duration_secs: f64) {
    histogram!(name("sweep_duration_seconds"), "stage" => stage.to_string()).record(duration_secs);
}
