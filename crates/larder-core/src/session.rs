//! Account lifecycle hooks around the sync engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::auth::{AuthError, SessionPersistence, SupabaseAuthClient};
use crate::sync::{
    LocalStoreAdapter, RemoteTableService, SyncError, SyncOrchestrator, SyncReport,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Per-account entry points: background passes after local edits, awaited
/// passes, and the sign-out wipe.
pub struct AccountSession<L, R> {
    orchestrator: Arc<SyncOrchestrator<L, R>>,
    queued: Arc<AtomicBool>,
}

impl<L, R> Clone for AccountSession<L, R> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            queued: Arc::clone(&self.queued),
        }
    }
}

impl<L, R> AccountSession<L, R>
where
    L: LocalStoreAdapter + 'static,
    R: RemoteTableService + 'static,
{
    pub fn new(orchestrator: Arc<SyncOrchestrator<L, R>>) -> Self {
        Self {
            orchestrator,
            queued: Arc::new(AtomicBool::new(false)),
        }
    }

    pub const fn orchestrator(&self) -> &Arc<SyncOrchestrator<L, R>> {
        &self.orchestrator
    }

    /// Schedule a pass after a local mutation without waiting for it.
    ///
    /// The pass runs once the current one (if any) finishes. While a pass is
    /// already queued further calls return `None`; the queued pass will pick
    /// their changes up. Errors are logged, never returned.
    pub fn notify_changes(&self, owner_id: &str) -> Option<JoinHandle<()>> {
        if self.queued.swap(true, Ordering::AcqRel) {
            tracing::debug!("Sync already queued");
            return None;
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let queued = Arc::clone(&self.queued);
        let owner_id = owner_id.to_string();

        Some(tokio::spawn(async move {
            let started = Arc::new(AtomicBool::new(false));
            let on_start = {
                let queued = Arc::clone(&queued);
                let started = Arc::clone(&started);
                move || {
                    queued.store(false, Ordering::Release);
                    started.store(true, Ordering::Release);
                }
            };
            let outcome = orchestrator.sync_all_when_idle(&owner_id, on_start).await;
            if !started.load(Ordering::Acquire) {
                // Rejected while waiting; let the next change queue again
                queued.store(false, Ordering::Release);
            }

            match outcome {
                Ok(report) => tracing::debug!(
                    changed = report.changed_rows(),
                    "Background sync finished"
                ),
                Err(SyncError::Cancelled) => tracing::debug!("Background sync cancelled"),
                Err(error) => tracing::warn!(%error, "Background sync failed"),
            }
        }))
    }

    /// Run a pass and wait for its outcome.
    pub async fn sync_now(&self, owner_id: &str) -> Result<SyncReport, SyncError> {
        self.orchestrator.sync_all(owner_id).await
    }

    /// Wipe every synced table. Stops any running or queued pass first.
    pub async fn clear_local_data(&self) -> Result<(), SyncError> {
        self.orchestrator.clear_local_data().await
    }

    /// Clear local data, then end the remote session.
    ///
    /// If the local wipe fails the remote session is left intact so the user
    /// can retry without losing access.
    pub async fn sign_out<S: SessionPersistence>(
        &self,
        auth: &SupabaseAuthClient<S>,
        access_token: &str,
    ) -> Result<(), SessionError> {
        self.clear_local_data().await?;
        auth.sign_out(access_token).await?;
        Ok(())
    }
}
