//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Which half of a table pass an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Push,
    Pull,
}

impl std::fmt::Display for SyncStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push => f.write_str("push"),
            Self::Pull => f.write_str("pull"),
        }
    }
}

/// Errors that abort a synchronization pass.
///
/// The engine never retries; the first error of a pass is surfaced to the
/// caller with local dirty state untouched.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The backend rejected the request.
    #[error("remote error on '{table}': {message}")]
    Remote {
        table: String,
        /// HTTP status when the service speaks HTTP.
        status: Option<u16>,
        message: String,
    },

    /// Network failure talking to the backend.
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// A remote call exceeded the configured bound.
    #[error("{stage} of '{table}' timed out")]
    Timeout { table: String, stage: SyncStage },

    /// A row could not be translated between local and remote shapes.
    #[error("cannot translate row '{id}' of '{table}': {message}")]
    Translation {
        table: String,
        id: String,
        message: String,
    },

    /// Local store failure.
    #[error("local store error: {0}")]
    Local(#[from] crate::Error),

    /// The table registry is malformed.
    #[error("invalid record descriptor: {0}")]
    InvalidDescriptor(String),

    /// Sync needs a signed-in owner.
    #[error("owner id must not be empty")]
    MissingOwner,

    /// Another pass holds the single-flight guard.
    #[error("a synchronization pass is already running")]
    InProgress,

    /// The pass observed a cancellation request.
    #[error("synchronization cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn remote(table: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Remote {
            table: table.into(),
            status,
            message: message.into(),
        }
    }

    pub fn translation(
        table: impl Into<String>,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Translation {
            table: table.into(),
            id: id.into(),
            message: message.into(),
        }
    }

    /// Returns true if a later retry by the caller may succeed unchanged.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout { .. } | Self::InProgress => true,
            Self::Remote { status, .. } => {
                status.is_none_or(|status| status == 408 || status == 429 || status >= 500)
            }
            _ => false,
        }
    }
}
