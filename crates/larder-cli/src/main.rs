//! Larder CLI - local pantry records with Supabase sync
//!
//! Edits land in the local database first and are pushed on `larder sync`.

mod auth;
mod cli;
mod commands;
mod config_profiles;
mod error;

use clap::{CommandFactory, Parser};

use crate::cli::{Cli, Commands};
use crate::commands::auth_cmd::run_auth;
use crate::commands::common::resolve_db_path;
use crate::commands::config::run_config;
use crate::commands::put::run_put;
use crate::commands::status::run_status;
use crate::commands::sync::{run_sync, run_sync_conflicts};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "larder=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let profile = cli.profile.as_deref();

    match cli.command {
        Some(Commands::Sync) => run_sync(&resolve_db_path(cli.db_path)?, profile).await?,
        Some(Commands::Status { json }) => {
            run_status(json, &resolve_db_path(cli.db_path)?).await?;
        }
        Some(Commands::Put {
            table,
            fields,
            id,
            sync,
        }) => {
            let db_path = resolve_db_path(cli.db_path)?;
            run_put(&table, &fields, id.as_deref(), sync, &db_path, profile).await?;
        }
        Some(Commands::Conflicts { limit, json }) => {
            run_sync_conflicts(limit, json, &resolve_db_path(cli.db_path)?).await?;
        }
        Some(Commands::Config { command }) => run_config(command, profile)?,
        Some(Commands::Auth { command }) => {
            run_auth(command, profile, &resolve_db_path(cli.db_path)?).await?;
        }
        None => {
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
