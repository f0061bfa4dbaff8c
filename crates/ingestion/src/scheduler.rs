//! Re-parse gate

use scholarmerge_common::models::{NormalizedDocument, RawRecord};

/// Whether `raw` must be (re)normalized.
///
/// True when nothing was produced yet, when the raw record changed after the
/// existing rendition was made, or when the adapter's schema moved on.
pub fn needs_reparse(
    raw: &RawRecord,
    existing: Option<&NormalizedDocument>,
    latest_version: i32,
) -> bool {
    match existing {
        None => true,
        Some(doc) => {
            raw.last_updated > doc.record.created_at || doc.record.version < latest_version
        }
    }
}
