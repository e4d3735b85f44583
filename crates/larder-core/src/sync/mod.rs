//! Local-first synchronization between the embedded store and the backend.
//!
//! Every registered table carries a `dirty` flag. A pass walks the
//! [`TableRegistry`] in order and, per table, pushes dirty rows as one
//! batched upsert, then pulls every row the owner has and overwrites the
//! local copies (remote wins). The first error stops the pass; whatever was
//! not confirmed stays dirty and is retried verbatim next time.
//!
//! Deletions are not propagated in either direction. A row deleted locally
//! comes back on the next pull if the remote still has it, and a row deleted
//! remotely stays local until `clear_local_data`.

mod adapter;
mod engine;
mod error;
mod registry;
mod translate;

pub use adapter::{LocalStoreAdapter, RemoteRow, RemoteTableService};
pub use engine::{ConflictPolicy, SyncOrchestrator, SyncReport, TableReport};
pub use error::{SyncError, SyncResult, SyncStage};
pub use registry::{
    Column, ColumnKind, RecordDescriptor, TableRegistry, INVENTORY_ITEMS, PRODUCTS,
    RECIPES, RECIPE_INGREDIENTS, RESERVED_COLUMNS, SHOPPING_LIST_ITEMS,
};
pub use translate::{
    check_local_value, decode_fields, project_for_push, remote_timestamp_millis, translate_pulled,
};
