use std::path::Path;

use larder_core::sync::TableRegistry;
use larder_core::RecordId;

use crate::commands::common::{
    account_session, format_report_lines, open_store, parse_fields, resolve_table,
    signed_in_profile,
};
use crate::error::CliError;

pub async fn run_put(
    table: &str,
    raw_fields: &str,
    id: Option<&str>,
    sync_after: bool,
    db_path: &Path,
    profile: Option<&str>,
) -> Result<(), CliError> {
    let registry = TableRegistry::larder_default();
    let descriptor = *resolve_table(&registry, table)?;
    let fields = parse_fields(&descriptor, raw_fields)?;
    let id = id.map(str::parse::<RecordId>).transpose()?;

    let profile = signed_in_profile(profile).await?;
    let owner_id = profile.session.owner_id().to_string();
    let store = open_store(db_path, &registry).await?;
    let record = store
        .write_record(&descriptor, &owner_id, id, fields)
        .await?;
    println!("Saved {}/{} (pending sync)", descriptor.local_table, record.id);

    if sync_after {
        let session = account_session(store, registry, &profile)?;
        let report = session.sync_now(&owner_id).await?;
        for line in format_report_lines(&report) {
            println!("{line}");
        }
    }
    Ok(())
}
