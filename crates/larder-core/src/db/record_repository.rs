//! Synced-table repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use std::collections::BTreeMap;

use libsql::params::Params;
use libsql::{Connection, Row, Value};
use serde::Serialize;

use super::connection::finish_transaction;
use crate::error::{Error, Result};
use crate::models::{FieldValue, RecordId, RecordVersion, SyncConflict, SyncRecord};
use crate::sync::{
    check_local_value, Column, ColumnKind, ConflictPolicy, RecordDescriptor, TableRegistry,
};
use crate::util::{normalize_text_option, unix_millis_now};

const RESERVED_SELECT: &str = "id, owner_id, updated_at, dirty";

/// Row counts for one synced table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStatus {
    pub table: &'static str,
    pub total: u64,
    pub dirty: u64,
}

/// libSQL repository over the tables described by a registry
pub struct LibSqlRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Rows with unpushed local changes, oldest first
    pub async fn find_dirty(&self, descriptor: &RecordDescriptor) -> Result<Vec<SyncRecord>> {
        self.select(descriptor, "WHERE dirty = 1 ORDER BY updated_at, id", Vec::new())
            .await
    }

    pub async fn get(&self, descriptor: &RecordDescriptor, id: &RecordId) -> Result<Option<SyncRecord>> {
        let mut records = self
            .select(descriptor, "WHERE id = ?", vec![Value::Text(id.to_string())])
            .await?;
        Ok(records.pop())
    }

    /// All rows of a table, most recently updated first
    pub async fn list(&self, descriptor: &RecordDescriptor) -> Result<Vec<SyncRecord>> {
        self.select(descriptor, "ORDER BY updated_at DESC, id", Vec::new())
            .await
    }

    /// Clear `dirty` where both id and `updated_at` still match.
    pub async fn mark_clean(
        &self,
        descriptor: &RecordDescriptor,
        versions: &[RecordVersion],
    ) -> Result<usize> {
        if versions.is_empty() {
            return Ok(0);
        }
        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        let outcome = self.mark_clean_rows(descriptor, versions).await;
        finish_transaction(self.conn, outcome).await
    }

    async fn mark_clean_rows(
        &self,
        descriptor: &RecordDescriptor,
        versions: &[RecordVersion],
    ) -> Result<usize> {
        let sql = format!(
            "UPDATE {} SET dirty = 0 WHERE id = ? AND updated_at = ? AND dirty = 1",
            descriptor.local_table
        );
        let mut cleaned = 0_u64;
        for version in versions {
            cleaned += self
                .conn
                .execute(
                    &sql,
                    Params::Positional(vec![
                        Value::Text(version.id.to_string()),
                        Value::Integer(version.updated_at),
                    ]),
                )
                .await?;
        }
        Ok(usize::try_from(cleaned).unwrap_or(usize::MAX))
    }

    /// Insert or overwrite pulled rows, always clean.
    ///
    /// Overwriting a row that is still dirty records a [`SyncConflict`].
    pub async fn upsert_many(
        &self,
        descriptor: &RecordDescriptor,
        records: &[SyncRecord],
    ) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        let outcome = self.upsert_rows(descriptor, records).await;
        finish_transaction(self.conn, outcome).await
    }

    async fn upsert_rows(&self, descriptor: &RecordDescriptor, records: &[SyncRecord]) -> Result<usize> {
        let upsert = upsert_sql(descriptor);
        let lookup = format!(
            "SELECT updated_at, dirty FROM {} WHERE id = ?",
            descriptor.local_table
        );
        let resolved_at = unix_millis_now();

        for record in records {
            let mut rows = self.conn.query(&lookup, [record.id.as_str()]).await?;
            if let Some(row) = rows.next().await? {
                let local_updated_at: i64 = row.get(0)?;
                let dirty: i64 = row.get(1)?;
                if dirty != 0 {
                    self.log_conflict(descriptor, record, local_updated_at, resolved_at)
                        .await?;
                }
            }

            self.conn
                .execute(
                    &upsert,
                    Params::Positional(record_params(descriptor, record, false)),
                )
                .await?;
        }
        Ok(records.len())
    }

    async fn log_conflict(
        &self,
        descriptor: &RecordDescriptor,
        incoming: &SyncRecord,
        local_updated_at: i64,
        resolved_at: i64,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_conflicts (
                    table_name,
                    record_id,
                    local_updated_at,
                    incoming_updated_at,
                    resolved_at,
                    strategy
                ) VALUES (?, ?, ?, ?, ?, ?)",
                libsql::params![
                    descriptor.local_table,
                    incoming.id.as_str(),
                    local_updated_at,
                    incoming.updated_at,
                    resolved_at,
                    ConflictPolicy::RemoteWins.as_str()
                ],
            )
            .await?;
        tracing::warn!(
            table = descriptor.local_table,
            record_id = incoming.id.as_str(),
            local_updated_at,
            incoming_updated_at = incoming.updated_at,
            "Pulled row overwrote unpushed local changes"
        );
        Ok(())
    }

    /// Delete every row of every registered table and the conflict log.
    pub async fn clear_all(&self, registry: &TableRegistry) -> Result<()> {
        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        let outcome = self.clear_tables(registry).await;
        finish_transaction(self.conn, outcome).await
    }

    async fn clear_tables(&self, registry: &TableRegistry) -> Result<()> {
        for descriptor in registry.iter() {
            self.conn
                .execute(&format!("DELETE FROM {}", descriptor.local_table), ())
                .await?;
        }
        self.conn.execute("DELETE FROM sync_conflicts", ()).await?;
        Ok(())
    }

    /// Create or update a row from a local mutation; the result is dirty.
    ///
    /// Given fields replace existing values, omitted ones are kept. Every
    /// write advances `updated_at` past the previous version.
    pub async fn write(
        &self,
        descriptor: &RecordDescriptor,
        owner_id: &str,
        id: Option<RecordId>,
        fields: BTreeMap<String, FieldValue>,
    ) -> Result<SyncRecord> {
        let owner_id = normalize_text_option(Some(owner_id.to_string()))
            .ok_or_else(|| Error::InvalidInput("owner id must not be empty".into()))?;
        if let Some(name) = fields.keys().find(|name| descriptor.column(name).is_none()) {
            return Err(Error::InvalidInput(format!(
                "table '{}' has no column '{name}'",
                descriptor.local_table
            )));
        }

        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        let outcome = self.write_row(descriptor, owner_id, id, fields).await;
        finish_transaction(self.conn, outcome).await
    }

    async fn write_row(
        &self,
        descriptor: &RecordDescriptor,
        owner_id: String,
        id: Option<RecordId>,
        fields: BTreeMap<String, FieldValue>,
    ) -> Result<SyncRecord> {
        let existing = match &id {
            Some(id) => self.get(descriptor, id).await?,
            None => None,
        };
        let now = unix_millis_now();

        let mut record = if let Some(mut record) = existing {
            if record
                .owner_id
                .as_deref()
                .is_some_and(|owner| owner != owner_id)
            {
                return Err(Error::InvalidInput(format!(
                    "record '{}' belongs to another account",
                    record.id
                )));
            }
            record.updated_at = now.max(record.updated_at.saturating_add(1));
            record.owner_id = Some(owner_id);
            record
        } else {
            let mut record = SyncRecord::new(id.unwrap_or_default(), owner_id, now);
            for column in descriptor.columns {
                record.fields.insert(column.name.to_string(), FieldValue::Null);
            }
            record
        };
        record.dirty = true;
        record.fields.extend(fields);

        for column in descriptor.columns {
            check_local_value(column, record.field(column.name)).map_err(Error::InvalidInput)?;
        }

        self.conn
            .execute(
                &upsert_sql(descriptor),
                Params::Positional(record_params(descriptor, &record, true)),
            )
            .await?;
        Ok(record)
    }

    /// Delete one row locally. Returns false when it did not exist.
    pub async fn delete(&self, descriptor: &RecordDescriptor, id: &RecordId) -> Result<bool> {
        let deleted = self
            .conn
            .execute(
                &format!("DELETE FROM {} WHERE id = ?", descriptor.local_table),
                [id.as_str()],
            )
            .await?;
        Ok(deleted > 0)
    }

    pub async fn table_status(&self, registry: &TableRegistry) -> Result<Vec<TableStatus>> {
        let mut statuses = Vec::with_capacity(registry.len());
        for descriptor in registry.iter() {
            let mut rows = self
                .conn
                .query(
                    &format!(
                        "SELECT COUNT(*), COALESCE(SUM(dirty), 0) FROM {}",
                        descriptor.local_table
                    ),
                    (),
                )
                .await?;
            let (total, dirty) = match rows.next().await? {
                Some(row) => (row.get::<i64>(0)?, row.get::<i64>(1)?),
                None => (0, 0),
            };
            statuses.push(TableStatus {
                table: descriptor.local_table,
                total: u64::try_from(total).unwrap_or_default(),
                dirty: u64::try_from(dirty).unwrap_or_default(),
            });
        }
        Ok(statuses)
    }

    /// Recorded remote-wins overwrites, newest first
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, table_name, record_id, local_updated_at, incoming_updated_at, resolved_at, strategy
                 FROM sync_conflicts
                 ORDER BY resolved_at DESC, id DESC
                 LIMIT ?",
                libsql::params![limit as i64],
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(SyncConflict {
                id: row.get(0)?,
                table_name: row.get(1)?,
                record_id: row.get(2)?,
                local_updated_at: row.get(3)?,
                incoming_updated_at: row.get(4)?,
                resolved_at: row.get(5)?,
                strategy: row.get(6)?,
            });
        }
        Ok(conflicts)
    }

    async fn select(
        &self,
        descriptor: &RecordDescriptor,
        clause: &str,
        params: Vec<Value>,
    ) -> Result<Vec<SyncRecord>> {
        let sql = format!(
            "SELECT {} FROM {} {clause}",
            select_list(descriptor),
            descriptor.local_table
        );
        let mut rows = self.conn.query(&sql, Params::Positional(params)).await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(parse_record(descriptor, &row)?);
        }
        Ok(records)
    }
}

fn select_list(descriptor: &RecordDescriptor) -> String {
    std::iter::once(RESERVED_SELECT)
        .chain(descriptor.columns.iter().map(|column| column.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn upsert_sql(descriptor: &RecordDescriptor) -> String {
    let names = ["id", "owner_id", "updated_at", "dirty"]
        .into_iter()
        .chain(descriptor.columns.iter().map(|column| column.name))
        .collect::<Vec<_>>();
    let placeholders = vec!["?"; names.len()].join(", ");
    let updates = names
        .iter()
        .skip(1)
        .map(|name| format!("{name} = excluded.{name}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({}) VALUES ({placeholders}) ON CONFLICT(id) DO UPDATE SET {updates}",
        descriptor.local_table,
        names.join(", ")
    )
}

fn record_params(descriptor: &RecordDescriptor, record: &SyncRecord, dirty: bool) -> Vec<Value> {
    let mut params = Vec::with_capacity(descriptor.columns.len() + 4);
    params.push(Value::Text(record.id.to_string()));
    params.push(
        record
            .owner_id
            .clone()
            .map_or(Value::Null, Value::Text),
    );
    params.push(Value::Integer(record.updated_at));
    params.push(Value::Integer(i64::from(dirty)));
    params.extend(
        descriptor
            .columns
            .iter()
            .map(|column| to_sql_value(record.field(column.name))),
    );
    params
}

fn to_sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Text(text) => Value::Text(text.clone()),
        FieldValue::Integer(number) | FieldValue::Timestamp(number) => Value::Integer(*number),
        FieldValue::Real(number) => Value::Real(*number),
        FieldValue::Boolean(flag) => Value::Integer(i64::from(*flag)),
    }
}

#[allow(clippy::cast_precision_loss)]
fn from_sql_value(column: &Column, value: Value) -> Result<FieldValue> {
    let field = match (column.kind, value) {
        (_, Value::Null) => FieldValue::Null,
        (ColumnKind::Text, Value::Text(text)) => FieldValue::Text(text),
        (ColumnKind::Integer, Value::Integer(number)) => FieldValue::Integer(number),
        (ColumnKind::Real, Value::Real(number)) => FieldValue::Real(number),
        (ColumnKind::Real, Value::Integer(number)) => FieldValue::Real(number as f64),
        (ColumnKind::Boolean, Value::Integer(flag)) => FieldValue::Boolean(flag != 0),
        (ColumnKind::Timestamp, Value::Integer(ms)) => FieldValue::Timestamp(ms),
        (kind, other) => {
            return Err(Error::Database(format!(
                "column '{}' holds {other:?}, expected {kind:?}",
                column.name
            )))
        }
    };
    Ok(field)
}

fn parse_record(descriptor: &RecordDescriptor, row: &Row) -> Result<SyncRecord> {
    let id: String = row.get(0)?;
    let owner_id = match row.get_value(1)? {
        Value::Text(owner) => Some(owner),
        Value::Null => None,
        other => {
            return Err(Error::Database(format!(
                "owner_id of '{id}' holds {other:?}"
            )))
        }
    };
    let updated_at: i64 = row.get(2)?;
    let dirty = row.get::<i64>(3)? != 0;

    let mut fields = BTreeMap::new();
    for (offset, column) in descriptor.columns.iter().enumerate() {
        let index = i32::try_from(offset + 4)
            .map_err(|_| Error::Database(format!("too many columns in '{}'", descriptor.local_table)))?;
        fields.insert(
            column.name.to_string(),
            from_sql_value(column, row.get_value(index)?)?,
        );
    }

    Ok(SyncRecord {
        id: RecordId::from_raw(id),
        owner_id,
        updated_at,
        dirty,
        fields,
    })
}
