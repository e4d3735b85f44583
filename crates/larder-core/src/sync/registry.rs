//! Record descriptors and the ordered table registry.
//!
//! A descriptor binds one logical entity to its local table and its remote
//! table. The registry is the fixed, ordered list the orchestrator walks; it
//! is built explicitly and injected, so tests can run against their own
//! tables.

use std::collections::HashSet;

use crate::sync::error::{SyncError, SyncResult};
use crate::util::is_plain_identifier;

/// Columns every synced table carries; descriptors may not redeclare them.
pub const RESERVED_COLUMNS: [&str; 4] = ["id", "owner_id", "updated_at", "dirty"];

/// Value type of a descriptor column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Real,
    Boolean,
    /// Unix ms locally, RFC 3339 remotely
    Timestamp,
}

impl ColumnKind {
    /// SQL type affinity used for the local table.
    pub const fn sql_type(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer | Self::Boolean | Self::Timestamp => "INTEGER",
            Self::Real => "REAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
}

impl Column {
    pub const fn required(name: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
        }
    }

    pub const fn optional(name: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            kind,
            nullable: true,
        }
    }
}

/// Static metadata for one replicated entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordDescriptor {
    pub local_table: &'static str,
    pub remote_table: &'static str,
    pub columns: &'static [Column],
}

impl RecordDescriptor {
    pub const fn new(
        local_table: &'static str,
        remote_table: &'static str,
        columns: &'static [Column],
    ) -> Self {
        Self {
            local_table,
            remote_table,
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    fn validate(&self) -> SyncResult<()> {
        for table in [self.local_table, self.remote_table] {
            if !is_plain_identifier(table) {
                return Err(SyncError::InvalidDescriptor(format!(
                    "table name '{table}' must match [a-z_][a-z0-9_]*"
                )));
            }
        }

        let mut seen = HashSet::new();
        for column in self.columns {
            if !is_plain_identifier(column.name) {
                return Err(SyncError::InvalidDescriptor(format!(
                    "column '{}.{}' must match [a-z_][a-z0-9_]*",
                    self.local_table, column.name
                )));
            }
            if RESERVED_COLUMNS.contains(&column.name) {
                return Err(SyncError::InvalidDescriptor(format!(
                    "column '{}.{}' is reserved",
                    self.local_table, column.name
                )));
            }
            if !seen.insert(column.name) {
                return Err(SyncError::InvalidDescriptor(format!(
                    "column '{}.{}' is declared twice",
                    self.local_table, column.name
                )));
            }
        }
        Ok(())
    }
}

/// Ordered list of descriptors processed by a synchronization pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRegistry {
    descriptors: Vec<RecordDescriptor>,
}

impl TableRegistry {
    /// Build a registry, validating identifiers and table uniqueness.
    pub fn new(descriptors: Vec<RecordDescriptor>) -> SyncResult<Self> {
        let mut local_tables = HashSet::new();
        for descriptor in &descriptors {
            descriptor.validate()?;
            if !local_tables.insert(descriptor.local_table) {
                return Err(SyncError::InvalidDescriptor(format!(
                    "table '{}' is registered twice",
                    descriptor.local_table
                )));
            }
        }
        Ok(Self { descriptors })
    }

    /// The app's replicated tables in processing order.
    pub fn larder_default() -> Self {
        Self {
            descriptors: vec![
                PRODUCTS,
                INVENTORY_ITEMS,
                SHOPPING_LIST_ITEMS,
                RECIPES,
                RECIPE_INGREDIENTS,
            ],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecordDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Look up a descriptor by its local table name.
    pub fn get(&self, local_table: &str) -> Option<&RecordDescriptor> {
        self.descriptors
            .iter()
            .find(|descriptor| descriptor.local_table == local_table)
    }
}

pub const PRODUCTS: RecordDescriptor = RecordDescriptor::new(
    "products",
    "products",
    &[
        Column::required("name", ColumnKind::Text),
        Column::optional("brand", ColumnKind::Text),
        Column::optional("barcode", ColumnKind::Text),
        Column::optional("category", ColumnKind::Text),
        Column::optional("default_unit", ColumnKind::Text),
    ],
);

pub const INVENTORY_ITEMS: RecordDescriptor = RecordDescriptor::new(
    "inventory_items",
    "inventory_items",
    &[
        Column::required("product_id", ColumnKind::Text),
        Column::required("quantity", ColumnKind::Real),
        Column::required("unit", ColumnKind::Text),
        Column::optional("location", ColumnKind::Text),
        Column::optional("expires_at", ColumnKind::Timestamp),
        Column::required("opened", ColumnKind::Boolean),
    ],
);

pub const SHOPPING_LIST_ITEMS: RecordDescriptor = RecordDescriptor::new(
    "shopping_list_items",
    "shopping_list_items",
    &[
        Column::optional("product_id", ColumnKind::Text),
        Column::required("name", ColumnKind::Text),
        Column::optional("quantity", ColumnKind::Real),
        Column::optional("unit", ColumnKind::Text),
        Column::required("checked", ColumnKind::Boolean),
    ],
);

pub const RECIPES: RecordDescriptor = RecordDescriptor::new(
    "recipes",
    "recipes",
    &[
        Column::required("title", ColumnKind::Text),
        Column::optional("servings", ColumnKind::Integer),
        Column::optional("instructions", ColumnKind::Text),
        Column::required("favorite", ColumnKind::Boolean),
    ],
);

pub const RECIPE_INGREDIENTS: RecordDescriptor = RecordDescriptor::new(
    "recipe_ingredients",
    "recipe_ingredients",
    &[
        Column::required("recipe_id", ColumnKind::Text),
        Column::optional("product_id", ColumnKind::Text),
        Column::optional("quantity", ColumnKind::Real),
        Column::optional("unit", ColumnKind::Text),
        Column::optional("note", ColumnKind::Text),
    ],
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_is_valid_and_ordered() {
        let registry = TableRegistry::larder_default();
        let validated = TableRegistry::new(registry.iter().copied().collect()).unwrap();
        let names = validated
            .iter()
            .map(|descriptor| descriptor.local_table)
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "products",
                "inventory_items",
                "shopping_list_items",
                "recipes",
                "recipe_ingredients"
            ]
        );
    }

    #[test]
    fn rejects_duplicate_tables() {
        let error = TableRegistry::new(vec![PRODUCTS, PRODUCTS]).unwrap_err();
        assert!(error.to_string().contains("registered twice"));
    }

    #[test]
    fn rejects_reserved_and_unsafe_columns() {
        const RESERVED: RecordDescriptor = RecordDescriptor::new(
            "things",
            "things",
            &[Column::required("dirty", ColumnKind::Boolean)],
        );
        const UNSAFE: RecordDescriptor = RecordDescriptor::new(
            "things",
            "things",
            &[Column::required("name; --", ColumnKind::Text)],
        );

        assert!(TableRegistry::new(vec![RESERVED])
            .unwrap_err()
            .to_string()
            .contains("reserved"));
        assert!(TableRegistry::new(vec![UNSAFE]).is_err());
    }

    #[test]
    fn get_finds_descriptor_by_local_table() {
        let registry = TableRegistry::larder_default();
        assert_eq!(registry.get("recipes"), Some(&RECIPES));
        assert!(registry.get("notes").is_none());
    }
}
