use std::path::Path;

use larder_core::sync::TableRegistry;

use crate::commands::common::{format_status_lines, open_store};
use crate::error::CliError;

pub async fn run_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let registry = TableRegistry::larder_default();
    let statuses = open_store(db_path, &registry)
        .await?
        .table_status(&registry)
        .await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else {
        for line in format_status_lines(&statuses) {
            println!("{line}");
        }
    }
    Ok(())
}
