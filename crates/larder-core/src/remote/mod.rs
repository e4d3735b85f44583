//! Remote table services: the Supabase REST backend and an in-process stand-in.

mod memory;
mod postgrest;

pub use memory::{InMemoryRemote, RemoteCall, RemoteOp};
pub use postgrest::PostgrestTableService;
