//! Database layer for Larder

mod connection;
mod migrations;
mod record_repository;

pub use connection::Database;
pub use record_repository::{LibSqlRecordRepository, TableStatus};
