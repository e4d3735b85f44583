//! Shared services used by every Larder client.

mod local_store;

pub use local_store::LocalStore;
