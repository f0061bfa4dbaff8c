//! Postgres-backed document store
//!
//! Entries are stored as JSONB documents with their identifier columns
//! projected out for the partial unique indexes. Multi-row mutations run in
//! one transaction; single-entry read-modify-write paths lock the row.

use crate::db::models::*;
use crate::db::store::{DocumentStore, IdentifierQuery};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::identifiers;
use crate::models::{Embedding, EntryDocument, NormalizedDocument, RawRecord, SimilarAbstract};
use crate::neighbors::NeighborHeap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, DbBackend, DbErr, EntityTrait, NotSet, QueryFilter, QueryOrder,
    QuerySelect, Set, SqlErr, Statement, TransactionTrait,
};
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.conn()
    }

    /// Lock an entry row for the rest of the transaction
    async fn lock_entry(&self, txn: &DatabaseTransaction, id: Uuid) -> Result<EntryRow> {
        EntryEntity::find_by_id(id)
            .lock_exclusive()
            .one(txn)
            .await?
            .ok_or(AppError::EntryNotFound { id })
    }
}

// ============================================================================
// Row conversions
// ============================================================================

fn raw_from_row(row: RawRecordRow) -> RawRecord {
    RawRecord {
        id: row.id,
        origin: row.origin,
        source_key: row.source_key,
        payload: row.payload,
        last_updated: row.last_updated.with_timezone(&Utc),
        created_at: row.created_at.with_timezone(&Utc),
    }
}

fn normalized_from_row(row: NormalizedRow) -> Result<NormalizedDocument> {
    Ok(serde_json::from_value(row.document)?)
}

/// Columns are authoritative over the embedded copy
fn entry_from_row(row: EntryRow) -> Result<EntryDocument> {
    let mut entry: EntryDocument = serde_json::from_value(row.document)?;
    entry.id = row.id;
    entry.ordinal = row.ordinal;
    entry.revision = row.revision;
    entry.synced = row.synced;
    Ok(entry)
}

fn entry_active_model(entry: &EntryDocument) -> Result<EntryActiveModel> {
    let record = &entry.record;
    Ok(EntryActiveModel {
        id: Set(entry.id),
        ordinal: NotSet,
        revision: Set(entry.revision),
        doi: Set(record.doi.clone()),
        pmcid: Set(record.pmcid.clone()),
        pubmed_id: Set(record.pubmed_id.clone()),
        scopus_eid: Set(record.scopus_eid.clone()),
        title: Set(record.title.clone()),
        has_abstract: Set(entry.abstract_text().is_some()),
        synced: Set(entry.synced),
        last_updated: Set(record.last_updated.into()),
        document: Set(serde_json::to_value(entry)?),
    })
}

/// Unique-index violations become retryable conflicts
fn write_error(err: DbErr) -> AppError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail)) => {
            let field = ["doi", "pmcid", "pubmed_id", "scopus_eid"]
                .into_iter()
                .find(|f| detail.contains(&format!("entries_{}_key", f)))
                .unwrap_or("identifier");
            AppError::UniquenessConflict {
                field: field.to_string(),
                value: detail,
            }
        }
        _ => AppError::Database(err),
    }
}

#[async_trait]
impl DocumentStore for Repository {
    // ========================================================================
    // Raw Records
    // ========================================================================

    async fn upsert_raw_record(&self, record: RawRecord) -> Result<RawRecord> {
        let active = RawRecordActiveModel {
            id: Set(record.id),
            origin: Set(record.origin),
            source_key: Set(record.source_key),
            payload: Set(record.payload),
            last_updated: Set(record.last_updated.into()),
            created_at: Set(record.created_at.into()),
        };

        let row = RawRecordEntity::insert(active)
            .on_conflict(
                OnConflict::columns([RawRecordColumn::Origin, RawRecordColumn::SourceKey])
                    .update_columns([RawRecordColumn::Payload, RawRecordColumn::LastUpdated])
                    .to_owned(),
            )
            .exec_with_returning(self.conn())
            .await?;

        Ok(raw_from_row(row))
    }

    async fn list_raw_records(&self) -> Result<Vec<RawRecord>> {
        let rows = RawRecordEntity::find()
            .order_by_asc(RawRecordColumn::CreatedAt)
            .all(self.conn())
            .await?;
        Ok(rows.into_iter().map(raw_from_row).collect())
    }

    // ========================================================================
    // Normalized Documents
    // ========================================================================

    async fn find_normalized(&self, raw_id: Uuid) -> Result<Option<NormalizedDocument>> {
        NormalizedEntity::find()
            .filter(NormalizedColumn::RawId.eq(raw_id))
            .one(self.conn())
            .await?
            .map(normalized_from_row)
            .transpose()
    }

    async fn swap_normalized(
        &self,
        previous: Option<Uuid>,
        document: &NormalizedDocument,
    ) -> Result<()> {
        let txn = self.conn().begin().await?;

        if let Some(previous) = previous {
            NormalizedEntity::delete_by_id(previous).exec(&txn).await?;
        }

        NormalizedActiveModel {
            id: Set(document.id),
            raw_id: Set(document.raw_id),
            origin: Set(document.record.origin.clone()),
            version: Set(document.record.version),
            created_at: Set(document.record.created_at.into()),
            document: Set(serde_json::to_value(document)?),
        }
        .insert(&txn)
        .await?;

        if let Some(previous) = previous {
            let stmt = Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                UPDATE entries
                SET document = jsonb_set(
                    document,
                    '{source_documents}',
                    (
                        SELECT jsonb_agg(
                            CASE WHEN member = to_jsonb($1::text) THEN to_jsonb($2::text) ELSE member END
                            ORDER BY idx
                        )
                        FROM jsonb_array_elements(document->'source_documents')
                            WITH ORDINALITY AS t(member, idx)
                    )
                )
                WHERE document->'source_documents' @> jsonb_build_array($1::text)
                "#,
                [previous.to_string().into(), document.id.to_string().into()],
            );
            txn.execute(stmt).await?;
        }

        txn.commit().await?;
        Ok(())
    }

    async fn normalized_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<NormalizedDocument>> {
        let mut query = NormalizedEntity::find();
        if let Some(since) = since {
            query = query.filter(NormalizedColumn::CreatedAt.gte(since));
        }
        query
            .order_by_asc(NormalizedColumn::CreatedAt)
            .all(self.conn())
            .await?
            .into_iter()
            .map(normalized_from_row)
            .collect()
    }

    // ========================================================================
    // Entries
    // ========================================================================

    async fn find_by_identifiers(&self, query: &IdentifierQuery) -> Result<Vec<EntryDocument>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut condition = Condition::any();
        if let Some(ref doi) = query.doi {
            condition = condition
                .add(EntryColumn::Doi.eq(doi.as_str()))
                .add(EntryColumn::Doi.like(identifiers::versioned_like_pattern(doi)));
        }
        if let Some(ref pmcid) = query.pmcid {
            condition = condition.add(EntryColumn::Pmcid.eq(pmcid.as_str()));
        }
        if let Some(ref pubmed_id) = query.pubmed_id {
            condition = condition.add(EntryColumn::PubmedId.eq(pubmed_id.as_str()));
        }
        if let Some(ref scopus_eid) = query.scopus_eid {
            condition = condition.add(EntryColumn::ScopusEid.eq(scopus_eid.as_str()));
        }
        if let Some(ref title) = query.title {
            condition = condition.add(EntryColumn::Title.eq(title.as_str()));
        }

        let rows = EntryEntity::find()
            .filter(condition)
            .order_by_asc(EntryColumn::Ordinal)
            .all(self.conn())
            .await?;

        // LIKE is looser than the `.vN` rule
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let entry = entry_from_row(row)?;
            if query.matches(&entry) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn get_entry(&self, id: Uuid) -> Result<Option<EntryDocument>> {
        EntryEntity::find_by_id(id)
            .one(self.conn())
            .await?
            .map(entry_from_row)
            .transpose()
    }

    async fn commit_fold(
        &self,
        survivor: &EntryDocument,
        absorbed: &[EntryDocument],
    ) -> Result<EntryDocument> {
        let txn = self.conn().begin().await?;

        for gone in absorbed {
            let deleted = EntryEntity::delete_many()
                .filter(EntryColumn::Id.eq(gone.id))
                .filter(EntryColumn::Revision.eq(gone.revision))
                .exec(&txn)
                .await?;
            if deleted.rows_affected == 0 {
                return Err(AppError::StaleRevision { id: gone.id });
            }
        }

        let mut stored = survivor.clone();
        stored.revision = survivor.revision + 1;
        stored.synced = false;

        let row = if survivor.is_new() {
            stored.similar_abstracts.clear();
            entry_active_model(&stored)?
                .insert(&txn)
                .await
                .map_err(write_error)?
        } else {
            let current = match self.lock_entry(&txn, survivor.id).await {
                Err(AppError::EntryNotFound { id }) => return Err(AppError::StaleRevision { id }),
                other => other?,
            };
            if current.revision != survivor.revision {
                return Err(AppError::StaleRevision { id: survivor.id });
            }
            stored.similar_abstracts = entry_from_row(current)?.similar_abstracts;
            entry_active_model(&stored)?
                .update(&txn)
                .await
                .map_err(write_error)?
        };

        txn.commit().await?;
        entry_from_row(row)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = EntryEntity::delete_by_id(id).exec(self.conn()).await?;
        Ok(result.rows_affected > 0)
    }

    async fn list_entries(&self) -> Result<Vec<EntryDocument>> {
        EntryEntity::find()
            .order_by_asc(EntryColumn::Ordinal)
            .all(self.conn())
            .await?
            .into_iter()
            .map(entry_from_row)
            .collect()
    }

    async fn entries_with_abstract(&self) -> Result<Vec<EntryDocument>> {
        EntryEntity::find()
            .filter(EntryColumn::HasAbstract.eq(true))
            .order_by_asc(EntryColumn::Ordinal)
            .all(self.conn())
            .await?
            .into_iter()
            .map(entry_from_row)
            .collect()
    }

    async fn set_embeddings(
        &self,
        id: Uuid,
        abstract_embedding: Option<&Embedding>,
        title_embedding: Option<&Embedding>,
    ) -> Result<()> {
        let txn = self.conn().begin().await?;
        let row = self.lock_entry(&txn, id).await?;

        let mut entry = entry_from_row(row.clone())?;
        entry.embedding_abstract = abstract_embedding.cloned();
        entry.embedding_title = title_embedding.cloned();

        let mut active: EntryActiveModel = row.into();
        active.document = Set(serde_json::to_value(&entry)?);
        active.update(&txn).await?;

        txn.commit().await?;
        Ok(())
    }

    async fn offer_neighbors(
        &self,
        id: Uuid,
        offers: &[SimilarAbstract],
        capacity: usize,
    ) -> Result<bool> {
        let txn = self.conn().begin().await?;
        let row = self.lock_entry(&txn, id).await?;
        let mut entry = entry_from_row(row.clone())?;

        let mut heap = NeighborHeap::from_list(capacity, &entry.similar_abstracts);
        let mut changed = false;
        for offer in offers {
            changed |= heap.offer(offer.clone());
        }
        if !changed {
            return Ok(false);
        }

        entry.similar_abstracts = heap.into_sorted_vec();
        entry.synced = false;

        let mut active: EntryActiveModel = row.into();
        active.document = Set(serde_json::to_value(&entry)?);
        active.synced = Set(false);
        active.update(&txn).await?;

        txn.commit().await?;
        Ok(true)
    }

    async fn clear_neighbors(&self) -> Result<u64> {
        let result = self
            .conn()
            .execute_unprepared(
                r#"
                UPDATE entries
                SET document = jsonb_set(document, '{similar_abstracts}', '[]'::jsonb),
                    synced = false
                WHERE jsonb_array_length(COALESCE(document->'similar_abstracts', '[]'::jsonb)) > 0
                "#,
            )
            .await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Export Flag
    // ========================================================================

    async fn mark_dirty(&self, id: Uuid) -> Result<()> {
        set_synced(self.conn(), id, false).await
    }

    async fn clear_dirty(&self, id: Uuid) -> Result<()> {
        set_synced(self.conn(), id, true).await
    }

    async fn list_unsynced(&self, limit: usize) -> Result<Vec<EntryDocument>> {
        EntryEntity::find()
            .filter(EntryColumn::Synced.eq(false))
            .order_by_asc(EntryColumn::Ordinal)
            .limit(limit as u64)
            .all(self.conn())
            .await?
            .into_iter()
            .map(entry_from_row)
            .collect()
    }

    // ========================================================================
    // Watermarks
    // ========================================================================

    async fn watermark(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        let row = WatermarkEntity::find_by_id(name.to_string())
            .one(self.conn())
            .await?;
        Ok(row.map(|r| r.swept_at.with_timezone(&Utc)))
    }

    async fn advance_watermark(&self, name: &str, at: DateTime<Utc>) -> Result<()> {
        let active = WatermarkActiveModel {
            name: Set(name.to_string()),
            swept_at: Set(at.into()),
        };
        WatermarkEntity::insert(active)
            .on_conflict(
                OnConflict::column(WatermarkColumn::Name)
                    .update_column(WatermarkColumn::SweptAt)
                    .to_owned(),
            )
            .exec(self.conn())
            .await?;
        Ok(())
    }
}

async fn set_synced(conn: &DatabaseConnection, id: Uuid, synced: bool) -> Result<()> {
    let result = EntryEntity::update_many()
        .col_expr(EntryColumn::Synced, Expr::value(synced))
        .filter(EntryColumn::Id.eq(id))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        return Err(AppError::EntryNotFound { id });
    }
    Ok(())
}
