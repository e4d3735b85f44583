//! Data models for Larder

mod record;
mod sync_conflict;

pub use record::{FieldValue, RecordId, RecordVersion, SyncRecord};
pub use sync_conflict::SyncConflict;
