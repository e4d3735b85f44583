//! Sync conflict model

use serde::{Deserialize, Serialize};

/// Recorded overwrite of a still-dirty local row by a pulled remote copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Local table the row lives in
    pub table_name: String,
    /// Record involved in the conflict
    pub record_id: String,
    /// Local row's timestamp when it was overwritten
    pub local_updated_at: i64,
    /// Incoming row's timestamp that won
    pub incoming_updated_at: i64,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
}
