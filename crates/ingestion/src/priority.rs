//! Source-level merge priority

use chrono::{DateTime, Utc};
use scholarmerge_common::models::EntryDocument;

/// Static origin ranking, highest first. Unknown origins rank below all
/// configured ones.
#[derive(Debug, Clone)]
pub struct PriorityTable {
    order: Vec<String>,
}

impl PriorityTable {
    pub fn new(order: Vec<String>) -> Self {
        Self { order }
    }

    /// Lower is better
    pub fn rank(&self, origin: &str) -> usize {
        self.order
            .iter()
            .position(|o| o == origin)
            .unwrap_or(self.order.len())
    }

    /// Whether `a` should win field conflicts against `b`.
    ///
    /// Same-origin ties go to the more recent document; exact ties keep `b`.
    pub fn outranks(&self, a: &EntryDocument, b: &EntryDocument) -> bool {
        let (ra, rb) = (self.rank(&a.record.origin), self.rank(&b.record.origin));
        if ra != rb {
            return ra < rb;
        }
        recency(a) > recency(b)
    }
}

/// An unstored document counts from when it was produced, so a fresh
/// re-parse beats the entry it already contributed to.
fn recency(doc: &EntryDocument) -> DateTime<Utc> {
    if doc.is_new() {
        doc.record.last_updated.max(doc.record.created_at)
    } else {
        doc.record.last_updated
    }
}
