//! Raw source record entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "raw_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub origin: String,

    /// Unique together with origin
    #[sea_orm(column_type = "Text")]
    pub source_key: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub payload: serde_json::Value,

    pub last_updated: DateTimeWithTimeZone,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::normalized_document::Entity")]
    NormalizedDocument,
}

impl Related<super::normalized_document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::NormalizedDocument.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
