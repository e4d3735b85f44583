//! Shared local store used by the sync engine and by app-side mutations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{Database, LibSqlRecordRepository, TableStatus};
use crate::models::{FieldValue, RecordId, RecordVersion, SyncConflict, SyncRecord};
use crate::sync::{LocalStoreAdapter, RecordDescriptor, TableRegistry};
use crate::Result;

/// Thread-safe handle over the local libSQL database.
///
/// Cloning shares the same connection; every operation takes the lock for
/// its whole duration, so multi-statement writes never interleave.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl LocalStore {
    /// Open (or create) the store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>, registry: &TableRegistry) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path, registry).await?;
        tracing::debug!(path = %db_path.display(), "Opened local store");
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory(registry: &TableRegistry) -> Result<Self> {
        let db = Database::open_in_memory(registry).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Create or update a row on behalf of `owner_id`; the row becomes dirty.
    pub async fn write_record(
        &self,
        descriptor: &RecordDescriptor,
        owner_id: &str,
        id: Option<RecordId>,
        fields: BTreeMap<String, FieldValue>,
    ) -> Result<SyncRecord> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.write(descriptor, owner_id, id, fields).await
    }

    pub async fn get_record(
        &self,
        descriptor: &RecordDescriptor,
        id: &RecordId,
    ) -> Result<Option<SyncRecord>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.get(descriptor, id).await
    }

    pub async fn list_records(&self, descriptor: &RecordDescriptor) -> Result<Vec<SyncRecord>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.list(descriptor).await
    }

    /// Delete a row locally. The remote copy is untouched and comes back on
    /// the next pull.
    pub async fn delete_record(&self, descriptor: &RecordDescriptor, id: &RecordId) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.delete(descriptor, id).await
    }

    /// Total and dirty row counts per registered table.
    pub async fn table_status(&self, registry: &TableRegistry) -> Result<Vec<TableStatus>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.table_status(registry).await
    }

    /// List recent remote-wins overwrites of unpushed rows.
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.list_conflicts(limit).await
    }
}

impl LocalStoreAdapter for LocalStore {
    async fn find_dirty(&self, descriptor: &RecordDescriptor) -> Result<Vec<SyncRecord>> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.find_dirty(descriptor).await
    }

    async fn mark_clean(
        &self,
        descriptor: &RecordDescriptor,
        versions: &[RecordVersion],
    ) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.mark_clean(descriptor, versions).await
    }

    async fn upsert_many(&self, descriptor: &RecordDescriptor, records: &[SyncRecord]) -> Result<usize> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.upsert_many(descriptor, records).await
    }

    async fn clear_all(&self, registry: &TableRegistry) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlRecordRepository::new(db.connection());
        repo.clear_all(registry).await
    }
}
