//! In-process remote with upsert-by-id semantics and failure injection.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::sync::{remote_timestamp_millis, RemoteRow, RemoteTableService, SyncError, SyncResult};

/// Which remote operation a call or an injected failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Upsert,
    Query,
}

/// One recorded call against the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub table: String,
    pub op: RemoteOp,
    /// Rows sent (upsert) or returned (query)
    pub rows: usize,
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    status: Option<u16>,
    message: String,
}

#[derive(Default)]
struct RemoteState {
    // table -> id -> row
    tables: HashMap<String, BTreeMap<String, RemoteRow>>,
    failures: HashMap<(String, RemoteOp), InjectedFailure>,
    calls: Vec<RemoteCall>,
}

/// A remote table service held entirely in memory.
///
/// Upserts merge into the stored row by `id`, like `PostgREST` with
/// `resolution=merge-duplicates`, so replaying a batch is harmless.
#[derive(Default)]
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
    latency: Mutex<Duration>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a row directly, bypassing call recording and failures.
    ///
    /// Rows that are not objects with a string `id` are ignored.
    pub fn seed(&self, table: &str, row: Value) {
        let Value::Object(row) = row else {
            tracing::warn!(table, "Ignoring non-object seed row");
            return;
        };
        let Some(id) = row.get("id").and_then(Value::as_str).map(str::to_string) else {
            tracing::warn!(table, "Ignoring seed row without id");
            return;
        };
        self.state()
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id, row);
    }

    /// Every row of a table, ordered by id.
    pub fn rows(&self, table: &str) -> Vec<RemoteRow> {
        self.state()
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row(&self, table: &str, id: &str) -> Option<RemoteRow> {
        self.state()
            .tables
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned()
    }

    /// Make every `op` on `table` fail until [`Self::clear_failures`].
    pub fn fail(&self, table: &str, op: RemoteOp, status: Option<u16>, message: impl Into<String>) {
        self.state().failures.insert(
            (table.to_string(), op),
            InjectedFailure {
                status,
                message: message.into(),
            },
        );
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Delay every call by `latency` before it touches any state.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Calls made so far, oldest first. Failed calls are included.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl RemoteTableService for InMemoryRemote {
    async fn upsert(&self, table: &str, rows: &[RemoteRow]) -> SyncResult<()> {
        self.simulate_latency().await;

        let mut state = self.state();
        state.calls.push(RemoteCall {
            table: table.to_string(),
            op: RemoteOp::Upsert,
            rows: rows.len(),
            since: None,
        });
        if let Some(failure) = state.failures.get(&(table.to_string(), RemoteOp::Upsert)) {
            return Err(SyncError::remote(table, failure.status, failure.message.clone()));
        }

        // Validate the whole batch first; a rejected batch writes nothing
        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(id) = row.get("id").and_then(Value::as_str) else {
                return Err(SyncError::remote(table, Some(400), "row has no string id"));
            };
            keyed.push((id.to_string(), row));
        }

        let stored = state.tables.entry(table.to_string()).or_default();
        for (id, row) in keyed {
            stored
                .entry(id)
                .or_default()
                .extend(row.iter().map(|(key, value)| (key.clone(), value.clone())));
        }
        Ok(())
    }

    async fn query_by_owner(
        &self,
        table: &str,
        owner_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<RemoteRow>> {
        self.simulate_latency().await;

        let mut state = self.state();
        if let Some(failure) = state.failures.get(&(table.to_string(), RemoteOp::Query)) {
            let error = SyncError::remote(table, failure.status, failure.message.clone());
            state.calls.push(RemoteCall {
                table: table.to_string(),
                op: RemoteOp::Query,
                rows: 0,
                since,
            });
            return Err(error);
        }

        let since_ms = since.map(|since| since.timestamp_millis());
        let mut rows = state
            .tables
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|row| row.get("owner_id").and_then(Value::as_str) == Some(owner_id))
                    .filter_map(|row| {
                        let updated_at = row.get("updated_at").and_then(remote_timestamp_millis);
                        match since_ms {
                            Some(since_ms) if updated_at.is_some_and(|at| at < since_ms) => None,
                            _ => Some((updated_at.unwrap_or_default(), row.clone())),
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        rows.sort_by(|(left_at, left), (right_at, right)| {
            left_at.cmp(right_at).then_with(|| {
                let left_id = left.get("id").and_then(Value::as_str);
                let right_id = right.get("id").and_then(Value::as_str);
                left_id.cmp(&right_id)
            })
        });

        state.calls.push(RemoteCall {
            table: table.to_string(),
            op: RemoteOp::Query,
            rows: rows.len(),
            since,
        });
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }
}
