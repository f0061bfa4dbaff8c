//! Document model
//!
//! - `RawRecord`: what a source delivered, untouched
//! - `NormalizedDocument`: one adapter's canonical rendition of a raw record
//! - `EntryDocument`: the merged record for one real-world paper

mod document;
mod entry;
pub mod legacy;
mod raw;

pub use document::{Author, DocumentType, NormalizedDocument, PaperRecord, Paragraph, Reference};
pub use entry::{content_hash, Embedding, EntryDocument, SimilarAbstract};
pub use raw::RawRecord;
