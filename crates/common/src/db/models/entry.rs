//! Merged entry entity
//!
//! The full document lives in `document`; identifier columns are projected
//! out of it so the partial unique indexes can enforce sparse uniqueness.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// BIGSERIAL, assigned on insert
    pub ordinal: i64,

    pub revision: i64,

    #[sea_orm(column_type = "Text", nullable)]
    pub doi: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub pmcid: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub pubmed_id: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub scopus_eid: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub title: Option<String>,

    pub has_abstract: bool,

    pub synced: bool,

    pub last_updated: DateTimeWithTimeZone,

    #[sea_orm(column_type = "JsonBinary")]
    pub document: serde_json::Value,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
