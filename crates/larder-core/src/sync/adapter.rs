//! The two narrow seams the engine drives: the embedded local store and the
//! remote table service.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::models::{RecordVersion, SyncRecord};
use crate::sync::error::SyncResult;
use crate::sync::registry::{RecordDescriptor, TableRegistry};

/// A row in its remote (JSON) representation.
pub type RemoteRow = serde_json::Map<String, serde_json::Value>;

/// Operations the engine needs from the local store.
pub trait LocalStoreAdapter: Send + Sync {
    /// All rows of the table with `dirty = true`.
    fn find_dirty(
        &self,
        descriptor: &RecordDescriptor,
    ) -> impl Future<Output = crate::Result<Vec<SyncRecord>>> + Send;

    /// Clear `dirty` on exactly the given versions; returns rows cleaned.
    ///
    /// A row whose `updated_at` moved past the given version stays dirty.
    fn mark_clean(
        &self,
        descriptor: &RecordDescriptor,
        versions: &[RecordVersion],
    ) -> impl Future<Output = crate::Result<usize>> + Send;

    /// Insert or overwrite rows by id, all-or-nothing; returns rows written.
    fn upsert_many(
        &self,
        descriptor: &RecordDescriptor,
        records: &[SyncRecord],
    ) -> impl Future<Output = crate::Result<usize>> + Send;

    /// Delete every row of every registered table.
    fn clear_all(&self, registry: &TableRegistry) -> impl Future<Output = crate::Result<()>> + Send;
}

/// Operations the engine needs from the backend.
pub trait RemoteTableService: Send + Sync {
    /// Insert-or-replace rows by id as one batch.
    fn upsert(&self, table: &str, rows: &[RemoteRow]) -> impl Future<Output = SyncResult<()>> + Send;

    /// Rows owned by `owner_id`; with `since`, only rows updated at or after it.
    fn query_by_owner(
        &self,
        table: &str,
        owner_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> impl Future<Output = SyncResult<Vec<RemoteRow>>> + Send;
}
