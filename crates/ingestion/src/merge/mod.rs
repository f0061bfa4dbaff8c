//! Field-level merging of documents into entries
//!
//! Scalar fields take the higher-priority value when it is present and
//! non-empty. Annotation fields accumulate from both sides. Cleanup runs on
//! every merged result.

pub mod cleanup;

use chrono::{DateTime, Utc};
use scholarmerge_common::models::{DocumentType, EntryDocument, NormalizedDocument, PaperRecord};
use uuid::Uuid;

use crate::priority::PriorityTable;

/// Result of folding one incoming document into its candidates.
#[derive(Debug, Clone)]
pub struct Fold {
    pub survivor: EntryDocument,
    /// Duplicate entries collapsed into the survivor; delete on commit
    pub absorbed: Vec<EntryDocument>,
}

impl Fold {
    pub fn is_creation(&self) -> bool {
        self.survivor.is_new()
    }
}

pub struct MergeEngine {
    priority: PriorityTable,
}

impl MergeEngine {
    pub fn new(priority: PriorityTable) -> Self {
        Self { priority }
    }

    /// Combine two documents; `high` wins every scalar conflict.
    ///
    /// Bookkeeping (id, ordinal, revision, neighbors, cached embeddings)
    /// follows the older stored side so the result updates it in place.
    pub fn merge(
        &self,
        high: &EntryDocument,
        low: &EntryDocument,
        now: DateTime<Utc>,
    ) -> EntryDocument {
        let (older, newer) = if stored_before(low, high) {
            (low, high)
        } else {
            (high, low)
        };
        let (h, l) = (&high.record, &low.record);
        let dated = dated_side(h, l);

        let record = PaperRecord {
            doi: text(&h.doi, &l.doi),
            title: text(&h.title, &l.title),
            authors: list(&h.authors, &l.authors),
            journal: text(&h.journal, &l.journal),
            journal_short: text(&h.journal_short, &l.journal_short),
            issn: text(&h.issn, &l.issn),
            publication_date: dated.publication_date,
            has_year: dated.has_year,
            has_month: dated.has_month,
            has_day: dated.has_day,
            abstract_text: text(&h.abstract_text, &l.abstract_text),
            origin: label(&h.origin, &l.origin),
            source_display: label(&h.source_display, &l.source_display),
            link: text(&h.link, &l.link),
            body_text: list(&h.body_text, &l.body_text),
            has_full_text: h.has_full_text.or(l.has_full_text),
            references: list(&h.references, &l.references),
            cited_by: list(&h.cited_by, &l.cited_by),
            category_human: union(&older.record.category_human, &newer.record.category_human),
            keywords: union(&older.record.keywords, &newer.record.keywords),
            summary_human: union(&older.record.summary_human, &newer.record.summary_human),
            is_preprint: h.is_preprint.or(l.is_preprint),
            is_covid19: sticky(h.is_covid19, l.is_covid19),
            license: text(&h.license, &l.license),
            copyright: text(&h.copyright, &l.copyright),
            pmcid: text(&h.pmcid, &l.pmcid),
            pubmed_id: text(&h.pubmed_id, &l.pubmed_id),
            scopus_eid: text(&h.scopus_eid, &l.scopus_eid),
            cord_uid: text(&h.cord_uid, &l.cord_uid),
            who_covidence: text(&h.who_covidence, &l.who_covidence),
            document_type: document_type(&h.document_type, &l.document_type),
            version: h.version,
            last_updated: now,
            created_at: h.created_at.min(l.created_at),
        };

        let title_side = if present(&h.title) { high } else { low };

        let mut merged = EntryDocument {
            id: older.id,
            ordinal: older.ordinal,
            revision: older.revision,
            record,
            is_pre_proof: false,
            source_documents: union_ids(&older.source_documents, &newer.source_documents),
            is_covid19_ml: high.is_covid19_ml.or(low.is_covid19_ml),
            keywords_ml: union(&older.keywords_ml, &newer.keywords_ml),
            embedding_abstract: older
                .embedding_abstract
                .clone()
                .or_else(|| newer.embedding_abstract.clone()),
            embedding_title: older
                .embedding_title
                .clone()
                .or_else(|| newer.embedding_title.clone()),
            similar_abstracts: older.similar_abstracts.clone(),
            synced: false,
        };
        cleanup::finish(&mut merged, title_side.is_pre_proof, now);
        merged
    }

    /// Fold `incoming` into every candidate, highest priority winning each
    /// step. The first candidate survives; the rest are absorbed.
    pub fn fold(
        &self,
        incoming: &NormalizedDocument,
        candidates: &[EntryDocument],
        now: DateTime<Utc>,
    ) -> Fold {
        let seed = seed(incoming);

        let Some(first) = candidates.first() else {
            let mut survivor = seed;
            survivor.record.last_updated = now;
            tidy_annotations(&mut survivor);
            cleanup::finish(&mut survivor, false, now);
            return Fold {
                survivor,
                absorbed: Vec::new(),
            };
        };

        let mut survivor = candidates.iter().fold(seed, |acc, candidate| {
            if self.priority.outranks(&acc, candidate) {
                self.merge(&acc, candidate, now)
            } else {
                self.merge(candidate, &acc, now)
            }
        });

        survivor.id = first.id;
        survivor.ordinal = first.ordinal;
        survivor.revision = first.revision;
        survivor.similar_abstracts = first.similar_abstracts.clone();

        Fold {
            survivor,
            absorbed: candidates[1..].to_vec(),
        }
    }
}

/// An unstored entry carrying one normalized document.
pub fn seed(incoming: &NormalizedDocument) -> EntryDocument {
    let mut entry = EntryDocument::new(incoming.record.clone());
    entry.source_documents.push(incoming.id);
    entry
}

/// Stored entries precede unstored ones; among stored, lower ordinal first.
fn stored_before(a: &EntryDocument, b: &EntryDocument) -> bool {
    (a.is_new(), a.ordinal) < (b.is_new(), b.ordinal)
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

fn text(high: &Option<String>, low: &Option<String>) -> Option<String> {
    if present(high) {
        high.clone()
    } else if present(low) {
        low.clone()
    } else {
        None
    }
}

fn label(high: &str, low: &str) -> String {
    if high.trim().is_empty() {
        low.to_string()
    } else {
        high.to_string()
    }
}

fn list<T: Clone>(high: &[T], low: &[T]) -> Vec<T> {
    if high.is_empty() {
        low.to_vec()
    } else {
        high.to_vec()
    }
}

/// A date cleanup filled in (`has_year` unset) only wins when neither side
/// carries a real one.
fn dated_side<'a>(high: &'a PaperRecord, low: &'a PaperRecord) -> &'a PaperRecord {
    let real = |r: &PaperRecord| r.publication_date.is_some() && r.has_year;
    if real(high) {
        high
    } else if real(low) || high.publication_date.is_none() {
        low
    } else {
        high
    }
}

/// `Paper` is also the deserialization default, so it never overrides a
/// specific classification.
fn document_type(high: &DocumentType, low: &DocumentType) -> DocumentType {
    if *high == DocumentType::Paper {
        low.clone()
    } else {
        high.clone()
    }
}

fn sticky(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (None, None) => None,
        _ => Some(false),
    }
}

/// Trimmed, deduplicated, first-seen order.
fn union(first: &[String], second: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(first.len() + second.len());
    for value in first.iter().chain(second) {
        let value = value.trim();
        if !value.is_empty() && !out.iter().any(|v| v == value) {
            out.push(value.to_string());
        }
    }
    out
}

fn tidy_annotations(entry: &mut EntryDocument) {
    let fields = [
        &mut entry.record.category_human,
        &mut entry.record.keywords,
        &mut entry.record.summary_human,
        &mut entry.keywords_ml,
    ];
    for field in fields {
        *field = union(field.as_slice(), &[]);
    }
}

fn union_ids(first: &[Uuid], second: &[Uuid]) -> Vec<Uuid> {
    let mut out = first.to_vec();
    for id in second {
        if !out.contains(id) {
            out.push(*id);
        }
    }
    out
}
