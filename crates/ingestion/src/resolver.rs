//! Identity resolution against stored entries

use std::sync::Arc;

use scholarmerge_common::db::{DocumentStore, IdentifierQuery};
use scholarmerge_common::errors::Result;
use scholarmerge_common::identifiers;
use scholarmerge_common::models::{EntryDocument, NormalizedDocument};
use tracing::debug;

use crate::merge::cleanup;

pub struct IdentityResolver {
    store: Arc<dyn DocumentStore>,
    identifierless_types: Vec<String>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn DocumentStore>, identifierless_types: Vec<String>) -> Self {
        Self {
            store,
            identifierless_types,
        }
    }

    /// Entries that plausibly describe the same paper, ordered by ordinal.
    ///
    /// External identifiers are tried first; the exact title is consulted only
    /// when none of them hit.
    pub async fn find_candidates(&self, doc: &NormalizedDocument) -> Result<Vec<EntryDocument>> {
        let query = IdentifierQuery::identifiers_of(&doc.record);
        if !query.is_empty() {
            let found = self.store.find_by_identifiers(&query).await?;
            if !found.is_empty() {
                return Ok(found);
            }
        }

        let title = match doc.record.title.as_deref().and_then(|t| cleanup::clean_title(t).0) {
            Some(title) => title,
            None => return Ok(Vec::new()),
        };

        let mut found = self
            .store
            .find_by_identifiers(&IdentifierQuery::title(&title))
            .await?;

        // A title hit that carries a different DOI is another paper.
        if let Some(doi) = query.doi.as_deref() {
            found.retain(|entry| match entry.record.doi.as_deref() {
                Some(stored) => identifiers::doi_matches(stored, doi),
                None => true,
            });
        }

        if !found.is_empty() {
            debug!(document_id = %doc.id, title = %title, matches = found.len(), "Resolved by title");
        }
        Ok(found)
    }

    /// Whether an unmatched document may start a new entry
    pub fn may_create(&self, doc: &NormalizedDocument) -> bool {
        doc.record.has_external_identifier()
            || self
                .identifierless_types
                .iter()
                .any(|t| t == doc.record.document_type.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scholarmerge_common::db::MemoryStore;
    use scholarmerge_common::models::{DocumentType, PaperRecord};
    use uuid::Uuid;

    fn resolver(store: Arc<MemoryStore>) -> IdentityResolver {
        IdentityResolver::new(store, vec!["clinical_trial".into(), "patent".into()])
    }

    fn incoming(record: PaperRecord) -> NormalizedDocument {
        NormalizedDocument::new(Uuid::new_v4(), record)
    }

    async fn stored(store: &MemoryStore, record: PaperRecord) -> EntryDocument {
        store.upsert(&EntryDocument::new(record)).await.unwrap()
    }

    #[tokio::test]
    async fn test_versioned_doi_matches_canonical_entry() {
        let store = Arc::new(MemoryStore::new());
        let entry = stored(
            &store,
            PaperRecord {
                doi: Some("10.1/x".into()),
                ..Default::default()
            },
        )
        .await;

        let found = resolver(store)
            .find_candidates(&incoming(PaperRecord {
                doi: Some("10.1/X.v2".into()),
                ..Default::default()
            }))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, entry.id);
    }

    #[tokio::test]
    async fn test_blank_identifiers_never_match() {
        let store = Arc::new(MemoryStore::new());
        stored(
            &store,
            PaperRecord {
                pmcid: Some("PMC1".into()),
                ..Default::default()
            },
        )
        .await;

        let found = resolver(store)
            .find_candidates(&incoming(PaperRecord {
                pmcid: Some("   ".into()),
                ..Default::default()
            }))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_title_fallback_only_when_identifiers_miss() {
        let store = Arc::new(MemoryStore::new());
        let by_title = stored(
            &store,
            PaperRecord {
                pmcid: Some("PMC1".into()),
                title: Some("Y".into()),
                ..Default::default()
            },
        )
        .await;
        let by_id = stored(
            &store,
            PaperRecord {
                pubmed_id: Some("77".into()),
                title: Some("Other".into()),
                ..Default::default()
            },
        )
        .await;
        let r = resolver(store);

        let found = r
            .find_candidates(&incoming(PaperRecord {
                pubmed_id: Some("77".into()),
                title: Some("Y".into()),
                ..Default::default()
            }))
            .await
            .unwrap();
        assert_eq!(found.iter().map(|e| e.id).collect::<Vec<_>>(), vec![by_id.id]);

        let found = r
            .find_candidates(&incoming(PaperRecord {
                title: Some("Journal Pre-proof Y".into()),
                ..Default::default()
            }))
            .await
            .unwrap();
        assert_eq!(found.iter().map(|e| e.id).collect::<Vec<_>>(), vec![by_title.id]);
    }

    #[tokio::test]
    async fn test_title_match_with_conflicting_doi_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        stored(
            &store,
            PaperRecord {
                doi: Some("10.1/a".into()),
                title: Some("Editorial".into()),
                ..Default::default()
            },
        )
        .await;

        let found = resolver(store)
            .find_candidates(&incoming(PaperRecord {
                doi: Some("10.1/b".into()),
                title: Some("Editorial".into()),
                ..Default::default()
            }))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_creation_gate() {
        let r = resolver(Arc::new(MemoryStore::new()));
        let noise = incoming(PaperRecord {
            title: Some("Untitled".into()),
            ..Default::default()
        });
        assert!(!r.may_create(&noise));

        let trial = incoming(PaperRecord {
            document_type: DocumentType::ClinicalTrial,
            ..Default::default()
        });
        assert!(r.may_create(&trial));

        let paper = incoming(PaperRecord {
            scopus_eid: Some("2-s2.0-1".into()),
            ..Default::default()
        });
        assert!(r.may_create(&paper));
    }
}
