//! Translation between local rows and their remote JSON shape.
//!
//! Outgoing rows are a projection of the local row: `dirty` is dropped and
//! the owner plus a fresh server-visible `updated_at` are stamped on.
//! Incoming rows are decoded column by column against the descriptor and
//! always come out clean.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Number, Value};

use crate::models::{FieldValue, RecordId, SyncRecord};
use crate::sync::adapter::RemoteRow;
use crate::sync::error::{SyncError, SyncResult};
use crate::sync::registry::{Column, ColumnKind, RecordDescriptor};
use crate::util::millis_to_rfc3339;

/// Build the outgoing payload for one dirty local row.
pub fn project_for_push(
    descriptor: &RecordDescriptor,
    record: &SyncRecord,
    owner_id: &str,
    stamped_at_ms: i64,
) -> SyncResult<RemoteRow> {
    let mut row = RemoteRow::new();
    row.insert("id".into(), Value::String(record.id.to_string()));
    row.insert("owner_id".into(), Value::String(owner_id.to_string()));
    row.insert(
        "updated_at".into(),
        Value::String(millis_to_rfc3339(stamped_at_ms)),
    );

    for column in descriptor.columns {
        let value = encode_value(column, record.field(column.name)).map_err(|message| {
            SyncError::translation(descriptor.local_table, record.id.as_str(), message)
        })?;
        row.insert(column.name.to_string(), value);
    }

    Ok(row)
}

/// Decode one remote row into a clean local record.
pub fn translate_pulled(descriptor: &RecordDescriptor, row: &RemoteRow) -> SyncResult<SyncRecord> {
    let id = match row.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id.trim().to_string(),
        Some(Value::Number(id)) => id.to_string(),
        _ => {
            return Err(SyncError::translation(
                descriptor.local_table,
                "<unknown>",
                "row has no usable id",
            ))
        }
    };
    let fail = |message: String| SyncError::translation(descriptor.local_table, &id, message);

    let owner_id = match row.get("owner_id") {
        Some(Value::String(owner)) if !owner.trim().is_empty() => owner.trim().to_string(),
        _ => return Err(fail("row has no owner_id".to_string())),
    };
    let updated_at = match row.get("updated_at") {
        Some(value) if !value.is_null() => {
            decode_timestamp(value).map_err(|message| fail(format!("updated_at: {message}")))?
        }
        _ => return Err(fail("row has no updated_at".to_string())),
    };

    let mut fields = BTreeMap::new();
    for column in descriptor.columns {
        let value = decode_value(column, row.get(column.name).unwrap_or(&Value::Null))
            .map_err(|message| fail(format!("{}: {message}", column.name)))?;
        fields.insert(column.name.to_string(), value);
    }

    Ok(SyncRecord {
        id: RecordId::from_raw(id),
        owner_id: Some(owner_id),
        updated_at,
        dirty: false,
        fields,
    })
}

/// Check that a local value fits its column; used before local writes.
pub fn check_local_value(column: &Column, value: &FieldValue) -> Result<(), String> {
    encode_value(column, value).map(|_| ())
}

/// Decode a partial JSON object of descriptor columns into local values.
///
/// Only the keys present are returned, so the result can be merged into an
/// existing row. Reserved and unknown columns are rejected.
pub fn decode_fields(
    descriptor: &RecordDescriptor,
    object: &RemoteRow,
) -> Result<BTreeMap<String, FieldValue>, String> {
    let mut fields = BTreeMap::new();
    for (name, raw) in object {
        let Some(column) = descriptor.column(name) else {
            return Err(format!(
                "table '{}' has no writable column '{name}'",
                descriptor.local_table
            ));
        };
        let value = decode_value(column, raw).map_err(|message| format!("{name}: {message}"))?;
        fields.insert(name.clone(), value);
    }
    Ok(fields)
}

fn encode_value(column: &Column, value: &FieldValue) -> Result<Value, String> {
    match (column.kind, value) {
        (_, FieldValue::Null) if column.nullable => Ok(Value::Null),
        (_, FieldValue::Null) => Err(format!("column '{}' must not be null", column.name)),
        (ColumnKind::Text, FieldValue::Text(text)) => Ok(Value::String(text.clone())),
        (ColumnKind::Integer, FieldValue::Integer(number))
        | (ColumnKind::Real, FieldValue::Integer(number)) => Ok(Value::Number((*number).into())),
        (ColumnKind::Real, FieldValue::Real(number)) => Number::from_f64(*number)
            .map(Value::Number)
            .ok_or_else(|| format!("column '{}' holds a non-finite number", column.name)),
        (ColumnKind::Boolean, FieldValue::Boolean(flag)) => Ok(Value::Bool(*flag)),
        (ColumnKind::Timestamp, FieldValue::Timestamp(ms) | FieldValue::Integer(ms)) => {
            Ok(Value::String(millis_to_rfc3339(*ms)))
        }
        (kind, other) => Err(format!(
            "column '{}' expects {kind:?}, found {other:?}",
            column.name
        )),
    }
}

fn decode_value(column: &Column, raw: &Value) -> Result<FieldValue, String> {
    if raw.is_null() {
        return if column.nullable {
            Ok(FieldValue::Null)
        } else {
            Err("missing value for non-nullable column".to_string())
        };
    }

    match column.kind {
        ColumnKind::Text => match raw {
            Value::String(text) => Ok(FieldValue::Text(text.clone())),
            Value::Number(number) => Ok(FieldValue::Text(number.to_string())),
            other => Err(format!("expected text, found {other}")),
        },
        ColumnKind::Integer => decode_integer(raw).map(FieldValue::Integer),
        ColumnKind::Real => decode_real(raw).map(FieldValue::Real),
        ColumnKind::Boolean => decode_boolean(raw).map(FieldValue::Boolean),
        ColumnKind::Timestamp => decode_timestamp(raw).map(FieldValue::Timestamp),
    }
}

fn decode_integer(raw: &Value) -> Result<i64, String> {
    match raw {
        Value::Number(number) => match (number.as_i64(), number.as_f64()) {
            (Some(integer), _) => Ok(integer),
            (None, Some(float)) => whole_number(float),
            (None, None) => Err(format!("{number} is out of range")),
        },
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>().or_else(|_| {
                text.parse::<f64>()
                    .map_err(|_| format!("'{text}' is not a number"))
                    .and_then(whole_number)
            })
        }
        other => Err(format!("expected integer, found {other}")),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn whole_number(number: f64) -> Result<i64, String> {
    if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
        Ok(number as i64)
    } else {
        Err(format!("{number} is not an integer"))
    }
}

fn decode_real(raw: &Value) -> Result<f64, String> {
    match raw {
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| format!("{number} is out of range")),
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|number| number.is_finite())
            .ok_or_else(|| format!("'{text}' is not a number")),
        other => Err(format!("expected number, found {other}")),
    }
}

fn decode_boolean(raw: &Value) -> Result<bool, String> {
    match raw {
        Value::Bool(flag) => Ok(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(format!("{number} is not a boolean")),
        },
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(format!("'{text}' is not a boolean")),
        },
        other => Err(format!("expected boolean, found {other}")),
    }
}

fn decode_timestamp(raw: &Value) -> Result<i64, String> {
    match raw {
        Value::Number(number) => number
            .as_i64()
            .ok_or_else(|| format!("{number} is not a millisecond timestamp")),
        Value::String(text) => parse_timestamp(text.trim()),
        other => Err(format!("expected timestamp, found {other}")),
    }
}

fn parse_timestamp(text: &str) -> Result<i64, String> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(parsed.timestamp_millis());
    }
    // `timestamp without time zone` columns; read as UTC
    if let Ok(parsed) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
    {
        return Ok(parsed.and_utc().timestamp_millis());
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc().timestamp_millis());
        }
    }
    Err(format!("'{text}' is not a recognised date"))
}

/// Read a remote timestamp value (RFC 3339, date, or integer ms) as Unix ms.
pub fn remote_timestamp_millis(raw: &Value) -> Option<i64> {
    decode_timestamp(raw).ok()
}
