use std::io;

use larder_core::auth::AuthError;
use larder_core::session::SessionError;
use larder_core::sync::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] larder_core::Error),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Unknown table '{0}'. Run `larder status` to list synced tables.")]
    UnknownTable(String),
    #[error("Invalid row: {0}")]
    InvalidRecord(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Profile '{0}' is not signed in. Run `larder config init` + `larder auth login` first."
    )]
    NotSignedIn(String),
}
