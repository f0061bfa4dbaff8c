//! Embedding cache
//!
//! Embeddings live on the entry next to the hash of the text they came from.
//! They are recomputed only when that text or the active model changes.

use std::sync::Arc;

use scholarmerge_common::db::DocumentStore;
use scholarmerge_common::embeddings::Embedder;
use scholarmerge_common::errors::{AppError, Result};
use scholarmerge_common::metrics;
use scholarmerge_common::models::{Embedding, EntryDocument};
use tracing::{debug, instrument};

pub struct EmbeddingCache {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingCache {
    pub fn new(store: Arc<dyn DocumentStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    pub fn model(&self) -> &str {
        self.embedder.model_name()
    }

    /// Current abstract embedding for `entry`, computing and persisting it
    /// when the cached one is missing or stale.
    ///
    /// `Ok(None)` means the entry cannot be indexed (no abstract, or too
    /// short to embed). Other embedding errors are returned so the caller can
    /// retry the entry on a later sweep.
    #[instrument(skip(self, entry), fields(entry_id = %entry.id))]
    pub async fn ensure(&self, entry: &EntryDocument) -> Result<Option<Embedding>> {
        let abstract_embedding = match entry.abstract_text() {
            None => None,
            Some(text) => match self.current_or_embed(entry.embedding_abstract.as_ref(), text).await {
                Ok(embedding) => Some(embedding),
                Err(AppError::EmbeddingTooShort { tokens, minimum }) => {
                    debug!(tokens, minimum, "Abstract too short to embed, excluding");
                    None
                }
                Err(e) => return Err(e),
            },
        };

        // Titles are best effort; they never exclude an entry.
        let title_embedding = match entry.record.exact_title() {
            None => None,
            Some(title) => self
                .current_or_embed(entry.embedding_title.as_ref(), title)
                .await
                .map_err(|e| debug!(error = %e, "Title not embedded"))
                .ok(),
        };

        if abstract_embedding != entry.embedding_abstract
            || title_embedding != entry.embedding_title
        {
            self.store
                .set_embeddings(entry.id, abstract_embedding.as_ref(), title_embedding.as_ref())
                .await?;
        }

        Ok(abstract_embedding)
    }

    async fn current_or_embed(&self, cached: Option<&Embedding>, text: &str) -> Result<Embedding> {
        let model = self.embedder.model_name();
        if let Some(embedding) = cached.filter(|e| e.is_current(text, model)) {
            return Ok(embedding.clone());
        }

        match self.embedder.embed(text).await {
            Ok(values) => {
                metrics::record_embedding(model, true);
                Ok(Embedding::new(values, model, text))
            }
            Err(e) => {
                metrics::record_embedding(model, false);
                Err(e)
            }
        }
    }
}
