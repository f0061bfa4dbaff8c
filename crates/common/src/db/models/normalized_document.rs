//! Normalized document entity, one per raw record

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "normalized_documents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub raw_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub origin: String,

    /// Adapter schema version that produced this row
    pub version: i32,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(column_type = "JsonBinary")]
    pub document: serde_json::Value,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::raw_record::Entity",
        from = "Column::RawId",
        to = "super::raw_record::Column::Id",
        on_delete = "Cascade"
    )]
    RawRecord,
}

impl Related<super::raw_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RawRecord.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
