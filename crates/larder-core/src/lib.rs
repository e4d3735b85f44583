//! larder-core - Core library for Larder
//!
//! This crate contains the local-first sync engine and everything around it:
//! the record model, the libSQL local store, the Supabase remote table
//! service and auth client, and the account lifecycle hooks used by every
//! Larder interface.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod session;
pub mod state;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{FieldValue, RecordId, SyncRecord};
