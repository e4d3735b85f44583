use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use larder_core::config::{BackendConfig, SyncConfig};
use larder_core::db::TableStatus;
use larder_core::models::SyncConflict;
use larder_core::remote::PostgrestTableService;
use larder_core::services::LocalStore;
use larder_core::session::AccountSession;
use larder_core::sync::{decode_fields, RecordDescriptor, SyncOrchestrator, SyncReport, TableRegistry};
use larder_core::FieldValue;
use serde::Serialize;
use serde_json::Value;

use crate::auth::{auth_client_for_profile, AuthClient, AuthSession};
use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;

pub type CliAccountSession = AccountSession<LocalStore, PostgrestTableService>;

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub table: String,
    pub record_id: String,
    pub local_updated_at: i64,
    pub incoming_updated_at: i64,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub strategy: String,
}

/// A profile with a backend and a live (refreshed if needed) session.
pub struct SignedInProfile {
    pub name: String,
    pub backend: BackendConfig,
    pub sync_config: SyncConfig,
    pub auth: AuthClient,
    pub session: AuthSession,
}

pub async fn signed_in_profile(profile: Option<&str>) -> Result<SignedInProfile, CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let name = config.resolve_profile_name(profile);
    let profile = config
        .profile(&name)
        .ok_or_else(|| CliError::NotSignedIn(name.clone()))?;
    let backend = profile
        .backend_config()
        .map_err(CliError::Config)?
        .ok_or_else(|| CliError::NotSignedIn(name.clone()))?;
    let auth = auth_client_for_profile(&name, profile)?
        .ok_or_else(|| CliError::NotSignedIn(name.clone()))?;
    let session = auth
        .restore_session()
        .await?
        .ok_or_else(|| CliError::NotSignedIn(name.clone()))?;

    tracing::debug!(profile = %name, user_id = %session.user.id, "Restored session");
    Ok(SignedInProfile {
        name,
        backend,
        sync_config: profile.sync_config(),
        auth,
        session,
    })
}

pub fn account_session(
    store: LocalStore,
    registry: TableRegistry,
    profile: &SignedInProfile,
) -> Result<CliAccountSession, CliError> {
    let remote = PostgrestTableService::new(
        &profile.backend,
        profile.session.access_token.clone(),
        &profile.sync_config,
    )?;
    Ok(AccountSession::new(Arc::new(SyncOrchestrator::new(
        Arc::new(store),
        Arc::new(remote),
        registry,
        profile.sync_config.clone(),
    ))))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("LARDER_DB_PATH").map(PathBuf::from)) {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("larder").join("larder.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI data directory".to_string()))
}

pub async fn open_store(path: &Path, registry: &TableRegistry) -> Result<LocalStore, CliError> {
    Ok(LocalStore::open_path(path.to_path_buf(), registry).await?)
}

pub fn resolve_table<'a>(
    registry: &'a TableRegistry,
    name: &str,
) -> Result<&'a RecordDescriptor, CliError> {
    registry
        .get(name.trim())
        .ok_or_else(|| CliError::UnknownTable(name.trim().to_string()))
}

/// Parse the `put` payload: a JSON object of the table's own columns.
pub fn parse_fields(
    descriptor: &RecordDescriptor,
    raw: &str,
) -> Result<BTreeMap<String, FieldValue>, CliError> {
    let Value::Object(object) = serde_json::from_str::<Value>(raw)? else {
        return Err(CliError::InvalidRecord(
            "fields must be a JSON object".to_string(),
        ));
    };
    if object.is_empty() {
        return Err(CliError::InvalidRecord("no fields given".to_string()));
    }
    decode_fields(descriptor, &object).map_err(CliError::InvalidRecord)
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        table: conflict.table_name.clone(),
        record_id: conflict.record_id.clone(),
        local_updated_at: conflict.local_updated_at,
        incoming_updated_at: conflict.incoming_updated_at,
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_sync_timestamp(conflict.resolved_at),
        strategy: conflict.strategy.clone(),
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<11}  {}/{}  local={} incoming={}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.strategy,
                conflict.table_name,
                conflict.record_id,
                format_sync_timestamp(conflict.local_updated_at),
                format_sync_timestamp(conflict.incoming_updated_at)
            )
        })
        .collect()
}

pub fn format_status_lines(statuses: &[TableStatus]) -> Vec<String> {
    let width = statuses
        .iter()
        .map(|status| status.table.len())
        .max()
        .unwrap_or(0)
        .max("TABLE".len());

    let mut lines = vec![format!("{:<width$}  {:>7}  {:>7}", "TABLE", "ROWS", "PENDING")];
    lines.extend(statuses.iter().map(|status| {
        format!(
            "{:<width$}  {:>7}  {:>7}",
            status.table, status.total, status.dirty
        )
    }));
    lines
}

pub fn format_report_lines(report: &SyncReport) -> Vec<String> {
    let mut lines = report
        .tables
        .iter()
        .filter(|table| table.pushed > 0 || table.pulled > 0)
        .map(|table| {
            format!(
                "  {}: pushed {}, pulled {}",
                table.table, table.pushed, table.pulled
            )
        })
        .collect::<Vec<_>>();
    lines.insert(
        0,
        format!(
            "Sync completed: pushed {}, pulled {} ({})",
            report.pushed,
            report.pulled,
            report.policy.as_str()
        ),
    );
    lines
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}
