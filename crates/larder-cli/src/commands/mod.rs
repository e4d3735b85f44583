pub mod auth_cmd;
pub mod common;
pub mod config;
pub mod put;
pub mod status;
pub mod sync;
