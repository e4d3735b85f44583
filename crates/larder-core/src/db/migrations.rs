//! Database migrations
//!
//! The versioned base schema holds bookkeeping tables only. Synced tables are
//! derived from the registry by [`ensure_tables`]: created when missing and
//! widened with `ALTER TABLE ADD COLUMN` when a descriptor gains a column.

use std::collections::HashSet;

use crate::error::Result;
use crate::sync::{RecordDescriptor, TableRegistry};
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Migration to version 1: bookkeeping and the remote-wins conflict log
async fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    let statements = [
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        "CREATE TABLE IF NOT EXISTS sync_conflicts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            table_name TEXT NOT NULL,
            record_id TEXT NOT NULL,
            local_updated_at INTEGER NOT NULL,
            incoming_updated_at INTEGER NOT NULL,
            resolved_at INTEGER NOT NULL,
            strategy TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_record ON sync_conflicts(table_name, record_id)",
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved_at ON sync_conflicts(resolved_at DESC)",
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}

/// Create or widen one local table per registered descriptor.
pub async fn ensure_tables(conn: &Connection, registry: &TableRegistry) -> Result<()> {
    for descriptor in registry.iter() {
        let existing = existing_columns(conn, descriptor.local_table).await?;
        if existing.is_empty() {
            create_table(conn, descriptor).await?;
            continue;
        }

        for column in descriptor.columns {
            if existing.contains(column.name) {
                continue;
            }
            conn.execute(
                &format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    descriptor.local_table,
                    column.name,
                    column.kind.sql_type()
                ),
                (),
            )
            .await?;
            tracing::info!(
                table = descriptor.local_table,
                column = column.name,
                "Added column to synced table"
            );
        }
    }
    Ok(())
}

async fn create_table(conn: &Connection, descriptor: &RecordDescriptor) -> Result<()> {
    let mut columns = vec![
        "id TEXT PRIMARY KEY".to_string(),
        "owner_id TEXT".to_string(),
        "updated_at INTEGER NOT NULL".to_string(),
        "dirty INTEGER NOT NULL DEFAULT 1".to_string(),
    ];
    columns.extend(
        descriptor
            .columns
            .iter()
            .map(|column| format!("{} {}", column.name, column.kind.sql_type())),
    );

    let table = descriptor.local_table;
    let statements = [
        format!("CREATE TABLE IF NOT EXISTS {table} ({})", columns.join(", ")),
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_dirty ON {table}(dirty)"),
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_owner ON {table}(owner_id)"),
    ];

    conn.execute("BEGIN TRANSACTION", ()).await?;
    for stmt in &statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }
    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::debug!(table, "Created synced table");
    Ok(())
}

async fn existing_columns(conn: &Connection, table: &str) -> Result<HashSet<String>> {
    let mut rows = conn
        .query(&format!("PRAGMA table_info({table})"), ())
        .await?;
    let mut columns = HashSet::new();
    while let Some(row) = rows.next().await? {
        let name: String = row.get(1)?;
        columns.insert(name);
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{Column, ColumnKind, RecordDescriptor, PRODUCTS};
    use libsql::Builder;

    async fn setup() -> Connection {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_idempotent() {
        let conn = setup().await;
        run(&conn).await.unwrap();
        run(&conn).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ensure_tables_creates_reserved_and_descriptor_columns() {
        let conn = setup().await;
        let registry = TableRegistry::new(vec![PRODUCTS]).unwrap();
        ensure_tables(&conn, &registry).await.unwrap();
        ensure_tables(&conn, &registry).await.unwrap();

        let columns = existing_columns(&conn, "products").await.unwrap();
        for name in ["id", "owner_id", "updated_at", "dirty", "name", "barcode"] {
            assert!(columns.contains(name), "missing column {name}");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ensure_tables_adds_new_descriptor_columns() {
        const V1: RecordDescriptor = RecordDescriptor::new(
            "pantry_notes",
            "pantry_notes",
            &[Column::required("body", ColumnKind::Text)],
        );
        const V2: RecordDescriptor = RecordDescriptor::new(
            "pantry_notes",
            "pantry_notes",
            &[
                Column::required("body", ColumnKind::Text),
                Column::optional("pinned", ColumnKind::Boolean),
            ],
        );

        let conn = setup().await;
        ensure_tables(&conn, &TableRegistry::new(vec![V1]).unwrap())
            .await
            .unwrap();
        ensure_tables(&conn, &TableRegistry::new(vec![V2]).unwrap())
            .await
            .unwrap();

        let columns = existing_columns(&conn, "pantry_notes").await.unwrap();
        assert!(columns.contains("pinned"));
    }
}
