//! The synchronization pass: push then pull for every registered table.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::config::{PullMode, SyncConfig};
use crate::models::{RecordVersion, SyncRecord};
use crate::state::SyncState;
use crate::sync::adapter::{LocalStoreAdapter, RemoteTableService};
use crate::sync::error::{SyncError, SyncResult, SyncStage};
use crate::sync::registry::{RecordDescriptor, TableRegistry};
use crate::sync::translate::{project_for_push, translate_pulled};
use crate::util::unix_millis_now;

/// How pulled rows are reconciled with local ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Pulled rows overwrite local rows unconditionally, dirty or not.
    #[default]
    RemoteWins,
}

impl ConflictPolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RemoteWins => "remote_wins",
        }
    }
}

/// Row counts for one table of a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub table: &'static str,
    pub pushed: usize,
    pub pulled: usize,
}

/// Outcome of a successful pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub pushed: usize,
    pub pulled: usize,
    pub policy: ConflictPolicy,
    pub tables: Vec<TableReport>,
}

impl SyncReport {
    /// Rows pushed plus rows pulled.
    pub const fn changed_rows(&self) -> usize {
        self.pushed + self.pulled
    }

    fn record(&mut self, table: TableReport) {
        self.pushed += table.pushed;
        self.pulled += table.pulled;
        self.tables.push(table);
    }
}

/// Drives synchronization passes against one local store and one remote.
///
/// Only one pass runs at a time. `sync_all` fails fast with
/// [`SyncError::InProgress`] on overlap; [`Self::sync_all_when_idle`] queues
/// behind the running pass instead.
pub struct SyncOrchestrator<L, R> {
    local: Arc<L>,
    remote: Arc<R>,
    registry: TableRegistry,
    config: SyncConfig,
    pass_guard: tokio::sync::Mutex<()>,
    state: watch::Sender<SyncState>,
    cancel_epoch: AtomicU64,
    // (owner, table) -> largest pulled updated_at, in ms
    watermarks: Mutex<HashMap<(String, &'static str), i64>>,
}

impl<L, R> SyncOrchestrator<L, R>
where
    L: LocalStoreAdapter,
    R: RemoteTableService,
{
    pub fn new(local: Arc<L>, remote: Arc<R>, registry: TableRegistry, config: SyncConfig) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            local,
            remote,
            registry,
            config,
            pass_guard: tokio::sync::Mutex::new(()),
            state,
            cancel_epoch: AtomicU64::new(0),
            watermarks: Mutex::new(HashMap::new()),
        }
    }

    pub const fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn local(&self) -> &Arc<L> {
        &self.local
    }

    /// Watch pass progress.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    /// Returns true while a pass holds the guard.
    pub fn is_running(&self) -> bool {
        self.pass_guard.try_lock().is_err()
    }

    /// Ask the running pass, and any queued one, to stop.
    ///
    /// The running pass stops before its next stage; a stage already talking
    /// to the remote finishes first.
    pub fn cancel(&self) {
        self.cancel_epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Run one full pass for `owner_id`.
    pub async fn sync_all(&self, owner_id: &str) -> SyncResult<SyncReport> {
        let owner_id = checked_owner(owner_id)?;
        let epoch = self.cancel_epoch.load(Ordering::SeqCst);
        let Ok(_pass) = self.pass_guard.try_lock() else {
            return Err(SyncError::InProgress);
        };
        self.run_pass(owner_id, epoch).await
    }

    /// Wait for any running pass to finish, then run one.
    ///
    /// `on_start` fires once the guard is held, before the first stage. A
    /// `cancel` issued while waiting turns this pass into
    /// [`SyncError::Cancelled`].
    pub async fn sync_all_when_idle<F>(&self, owner_id: &str, on_start: F) -> SyncResult<SyncReport>
    where
        F: FnOnce() + Send,
    {
        let owner_id = checked_owner(owner_id)?;
        let epoch = self.cancel_epoch.load(Ordering::SeqCst);
        let _pass = self.pass_guard.lock().await;
        on_start();
        self.run_pass(owner_id, epoch).await
    }

    /// Push one table outside a full pass.
    pub async fn push_table(&self, descriptor: &RecordDescriptor, owner_id: &str) -> SyncResult<usize> {
        let owner_id = checked_owner(owner_id)?;
        let Ok(_pass) = self.pass_guard.try_lock() else {
            return Err(SyncError::InProgress);
        };
        self.push_stage(descriptor, owner_id).await
    }

    /// Pull one table outside a full pass.
    pub async fn pull_table(&self, descriptor: &RecordDescriptor, owner_id: &str) -> SyncResult<usize> {
        let owner_id = checked_owner(owner_id)?;
        let Ok(_pass) = self.pass_guard.try_lock() else {
            return Err(SyncError::InProgress);
        };
        self.pull_stage(descriptor, owner_id).await
    }

    /// Delete every local row of every registered table.
    ///
    /// Cancels the running pass and waits for it to release the guard, so no
    /// pulled row can land after the wipe. Passes queued while waiting are
    /// cancelled too. Pull watermarks are forgotten.
    pub async fn clear_local_data(&self) -> SyncResult<()> {
        self.cancel();
        let _pass = self.pass_guard.lock().await;
        // Passes queued while waiting captured the epoch bumped above
        self.cancel();
        self.local.clear_all(&self.registry).await?;
        self.watermarks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.state.send_replace(SyncState::Idle);
        tracing::info!(tables = self.registry.len(), "Cleared local data");
        Ok(())
    }

    async fn run_pass(&self, owner_id: &str, epoch: u64) -> SyncResult<SyncReport> {
        let mut report = SyncReport::default();

        for descriptor in self.registry.iter() {
            match self.sync_table(descriptor, owner_id, epoch).await {
                Ok(table) => report.record(table),
                Err(error) => {
                    tracing::warn!(table = descriptor.local_table, %error, "Sync pass aborted");
                    self.state.send_replace(SyncState::Aborted {
                        error: error.to_string(),
                    });
                    return Err(error);
                }
            }
        }

        self.state.send_replace(SyncState::Idle);
        tracing::info!(
            pushed = report.pushed,
            pulled = report.pulled,
            tables = report.tables.len(),
            "Sync pass complete"
        );
        Ok(report)
    }

    async fn sync_table(
        &self,
        descriptor: &RecordDescriptor,
        owner_id: &str,
        epoch: u64,
    ) -> SyncResult<TableReport> {
        self.check_cancelled(epoch)?;
        self.state.send_replace(SyncState::Pushing {
            table: descriptor.local_table,
        });
        let pushed = self.push_stage(descriptor, owner_id).await?;

        self.check_cancelled(epoch)?;
        self.state.send_replace(SyncState::Pulling {
            table: descriptor.local_table,
        });
        let pulled = self.pull_stage(descriptor, owner_id).await?;

        Ok(TableReport {
            table: descriptor.local_table,
            pushed,
            pulled,
        })
    }

    async fn push_stage(&self, descriptor: &RecordDescriptor, owner_id: &str) -> SyncResult<usize> {
        let dirty = self.local.find_dirty(descriptor).await?;
        if dirty.is_empty() {
            tracing::debug!(table = descriptor.local_table, "Nothing to push");
            return Ok(0);
        }

        let stamped_at = unix_millis_now();
        let rows = dirty
            .iter()
            .map(|record| {
                project_for_push(descriptor, record, owner_id, stamped_at.max(record.updated_at))
            })
            .collect::<SyncResult<Vec<_>>>()?;

        self.remote_call(
            descriptor,
            SyncStage::Push,
            self.remote.upsert(descriptor.remote_table, &rows),
        )
        .await?;

        let versions = dirty.iter().map(SyncRecord::version).collect::<Vec<RecordVersion>>();
        let cleaned = self.local.mark_clean(descriptor, &versions).await?;
        if cleaned < versions.len() {
            tracing::debug!(
                table = descriptor.local_table,
                rows = versions.len() - cleaned,
                "Rows rewritten during push stay dirty"
            );
        }

        tracing::debug!(table = descriptor.local_table, rows = rows.len(), "Pushed");
        Ok(rows.len())
    }

    async fn pull_stage(&self, descriptor: &RecordDescriptor, owner_id: &str) -> SyncResult<usize> {
        let since = self.watermark(owner_id, descriptor);
        let rows = self
            .remote_call(
                descriptor,
                SyncStage::Pull,
                self.remote
                    .query_by_owner(descriptor.remote_table, owner_id, since),
            )
            .await?;

        let records = rows
            .iter()
            .map(|row| {
                let record = translate_pulled(descriptor, row)?;
                if record.owner_id.as_deref() == Some(owner_id) {
                    Ok(record)
                } else {
                    Err(SyncError::translation(
                        descriptor.local_table,
                        record.id.as_str(),
                        "row belongs to another owner",
                    ))
                }
            })
            .collect::<SyncResult<Vec<_>>>()?;

        if records.is_empty() {
            tracing::debug!(table = descriptor.local_table, "Nothing to pull");
            return Ok(0);
        }

        let written = self.local.upsert_many(descriptor, &records).await?;
        if let Some(latest) = records.iter().map(|record| record.updated_at).max() {
            self.advance_watermark(owner_id, descriptor, latest);
        }

        tracing::debug!(table = descriptor.local_table, rows = written, "Pulled");
        Ok(written)
    }

    async fn remote_call<T>(
        &self,
        descriptor: &RecordDescriptor,
        stage: SyncStage,
        call: impl Future<Output = SyncResult<T>>,
    ) -> SyncResult<T> {
        tokio::time::timeout(self.config.request_timeout(), call)
            .await
            .map_err(|_| SyncError::Timeout {
                table: descriptor.remote_table.to_string(),
                stage,
            })?
    }

    fn check_cancelled(&self, epoch: u64) -> SyncResult<()> {
        if self.cancel_epoch.load(Ordering::SeqCst) == epoch {
            Ok(())
        } else {
            Err(SyncError::Cancelled)
        }
    }

    /// `since` for the next incremental pull: the watermark minus the
    /// configured overlap, since `updated_at` is stamped client-side.
    fn watermark(&self, owner_id: &str, descriptor: &RecordDescriptor) -> Option<DateTime<Utc>> {
        if self.config.pull_mode != PullMode::Incremental {
            return None;
        }
        let overlap = i64::try_from(self.config.watermark_overlap_ms).unwrap_or(i64::MAX);
        self.watermarks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(owner_id.to_string(), descriptor.local_table))
            .map(|mark| mark.saturating_sub(overlap).max(0))
            .and_then(DateTime::<Utc>::from_timestamp_millis)
    }

    fn advance_watermark(&self, owner_id: &str, descriptor: &RecordDescriptor, latest: i64) {
        if self.config.pull_mode != PullMode::Incremental {
            return;
        }
        let mut watermarks = self
            .watermarks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mark = watermarks
            .entry((owner_id.to_string(), descriptor.local_table))
            .or_insert(latest);
        *mark = (*mark).max(latest);
    }
}

fn checked_owner(owner_id: &str) -> SyncResult<&str> {
    let owner_id = owner_id.trim();
    if owner_id.is_empty() {
        Err(SyncError::MissingOwner)
    } else {
        Ok(owner_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldValue;
    use crate::remote::InMemoryRemote;
    use crate::services::LocalStore;
    use crate::sync::registry::{PRODUCTS, RECIPES};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    async fn orchestrator(
        config: SyncConfig,
    ) -> (
        SyncOrchestrator<LocalStore, InMemoryRemote>,
        Arc<LocalStore>,
        Arc<InMemoryRemote>,
    ) {
        let registry = TableRegistry::new(vec![PRODUCTS, RECIPES]).unwrap();
        let local = Arc::new(LocalStore::open_in_memory(&registry).await.unwrap());
        let remote = Arc::new(InMemoryRemote::new());
        let engine = SyncOrchestrator::new(
            Arc::clone(&local),
            Arc::clone(&remote),
            registry,
            config,
        );
        (engine, local, remote)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_owner_is_rejected() {
        let (engine, _, _) = orchestrator(SyncConfig::default()).await;
        assert!(matches!(
            engine.sync_all("  ").await,
            Err(SyncError::MissingOwner)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn report_lists_every_table_in_order() {
        let (engine, local, _) = orchestrator(SyncConfig::default()).await;
        local
            .write_record(
                &PRODUCTS,
                "u1",
                None,
                BTreeMap::from([("name".to_string(), FieldValue::from("Milk"))]),
            )
            .await
            .unwrap();

        let report = engine.sync_all("u1").await.unwrap();

        assert_eq!(
            report.tables,
            vec![
                TableReport {
                    table: "products",
                    pushed: 1,
                    pulled: 1,
                },
                TableReport {
                    table: "recipes",
                    pushed: 0,
                    pulled: 0,
                },
            ]
        );
        assert_eq!(report.changed_rows(), 2);
        assert_eq!(report.policy, ConflictPolicy::RemoteWins);
        assert_eq!(engine.state(), SyncState::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_before_pass_does_not_stick() {
        let (engine, _, _) = orchestrator(SyncConfig::default()).await;
        engine.cancel();
        assert!(engine.sync_all("u1").await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queued_pass_observes_cancel() {
        let (engine, _, _) = orchestrator(SyncConfig::default()).await;
        let engine = Arc::new(engine);

        let guard = engine.pass_guard.lock().await;
        let queued = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.sync_all_when_idle("u1", || {}).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        engine.cancel();
        drop(guard);

        assert!(matches!(queued.await.unwrap(), Err(SyncError::Cancelled)));
    }
}
