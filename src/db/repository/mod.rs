//! Repository layer: entity-scoped database operations.
//!
//! All public functions are re-exported here so callers use `db::repository::*`.

mod document;
mod processing_log;
mod reupload;

pub use document::*;
pub use processing_log::*;
pub use reupload::*;
