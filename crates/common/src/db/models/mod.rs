//! SeaORM entity models
//!
//! Database entities for ScholarMerge

mod entry;
mod normalized_document;
mod raw_record;
mod sweep_watermark;

pub use raw_record::{
    Entity as RawRecordEntity,
    Model as RawRecordRow,
    ActiveModel as RawRecordActiveModel,
    Column as RawRecordColumn,
};

pub use normalized_document::{
    Entity as NormalizedEntity,
    Model as NormalizedRow,
    ActiveModel as NormalizedActiveModel,
    Column as NormalizedColumn,
};

pub use entry::{
    Entity as EntryEntity,
    Model as EntryRow,
    ActiveModel as EntryActiveModel,
    Column as EntryColumn,
};

pub use sweep_watermark::{
    Entity as WatermarkEntity,
    Model as WatermarkRow,
    ActiveModel as WatermarkActiveModel,
    Column as WatermarkColumn,
};
