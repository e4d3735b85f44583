use std::path::Path;

use larder_core::sync::TableRegistry;

use crate::commands::common::{
    account_session, format_report_lines, format_sync_conflict_lines, open_store,
    signed_in_profile, sync_conflict_to_item, SyncConflictItem,
};
use crate::error::CliError;

pub async fn run_sync(db_path: &Path, profile: Option<&str>) -> Result<(), CliError> {
    let profile = signed_in_profile(profile).await?;
    let registry = TableRegistry::larder_default();
    let store = open_store(db_path, &registry).await?;
    let session = account_session(store, registry, &profile)?;

    tracing::info!(profile = %profile.name, "Starting sync");
    let report = session.sync_now(profile.session.owner_id()).await?;
    for line in format_report_lines(&report) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_sync_conflicts(
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let registry = TableRegistry::larder_default();
    let conflicts = open_store(db_path, &registry)
        .await?
        .list_conflicts(limit)
        .await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
