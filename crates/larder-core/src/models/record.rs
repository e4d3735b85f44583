//! Syncable record model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Identifier of a syncable record.
///
/// Assigned locally at creation time (UUID v7, time-sortable) and never
/// reassigned; the same value identifies the remote copy. Ids that arrive
/// from the remote side are treated as opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wrap an id read back from storage or the remote side
    pub(crate) const fn from_raw(id: String) -> Self {
        Self(id)
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("record id must not be empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// A single column value in its local representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
    /// Unix milliseconds
    Timestamp(i64),
}

impl FieldValue {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A row of a registered table, in local representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Stable identifier shared by the local and remote copies
    pub id: RecordId,
    /// Account the row belongs to; the remote partition key
    pub owner_id: Option<String>,
    /// Last mutation timestamp (Unix ms)
    pub updated_at: i64,
    /// True while the local copy has changes not yet confirmed remotely
    pub dirty: bool,
    /// Descriptor columns by name
    pub fields: BTreeMap<String, FieldValue>,
}

impl SyncRecord {
    /// Build a clean record (as it would arrive from a pull).
    #[must_use]
    pub fn new(id: RecordId, owner_id: impl Into<String>, updated_at: i64) -> Self {
        Self {
            id,
            owner_id: Some(owner_id.into()),
            updated_at,
            dirty: false,
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Field value by column name; missing columns read as `Null`.
    pub fn field(&self, name: &str) -> &FieldValue {
        static NULL: FieldValue = FieldValue::Null;
        self.fields.get(name).unwrap_or(&NULL)
    }

    pub fn version(&self) -> RecordVersion {
        RecordVersion {
            id: self.id.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// One observed version of a local row: the row as of a given `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordVersion {
    pub id: RecordId,
    pub updated_at: i64,
}
