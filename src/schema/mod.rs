//! Relational schema snapshot: value objects produced by one extraction pass.

mod extractor;

pub use extractor::SchemaExtractor;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// A single column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    /// Declared type as written in DDL (may be empty in SQLite).
    pub data_type: String,
    pub is_nullable: bool,
    pub comment: Option<String>,
}

/// A (possibly composite) foreign key constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeySchema {
    pub constrained_columns: Vec<String>,
    pub referred_schema: String,
    pub referred_table: String,
    pub referred_columns: Vec<String>,
    pub on_update: Option<String>,
    pub on_delete: Option<String>,
}

/// A UNIQUE constraint declared on the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniqueConstraintSchema {
    pub name: String,
    pub column_names: Vec<String>,
}

/// An explicitly created index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    pub column_names: Vec<String>,
    pub unique: bool,
}

/// Everything known about one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub schema_name: String,
    pub table_name: String,
    pub columns: Vec<ColumnSchema>,
    pub foreign_keys: Vec<ForeignKeySchema>,
    /// Primary key columns in key order.
    pub primary_key: Vec<String>,
    pub unique_constraints: Vec<UniqueConstraintSchema>,
    pub indexes: Vec<IndexSchema>,
    pub comment: Option<String>,
    pub is_junction_table: bool,
}

/// A table whose metadata could not be read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedTable {
    pub table_name: String,
    pub error: String,
}

/// Root snapshot of one extraction pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub tables: Vec<TableSchema>,
    #[serde(default)]
    pub skipped_tables: Vec<SkippedTable>,
}

impl DatabaseSchema {
    pub fn table(&self, table_name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.table_name == table_name)
    }

    pub fn column_count(&self) -> usize {
        self.tables.iter().map(|t| t.columns.len()).sum()
    }
}

impl TableSchema {
    pub fn column(&self, column_name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == column_name)
    }

    pub fn is_primary_key(&self, column_name: &str) -> bool {
        self.primary_key.iter().any(|c| c == column_name)
    }

    /// Fully qualified column node name (`table.column`).
    pub fn column_node_name(&self, column_name: &str) -> String {
        format!("{}.{}", self.table_name, column_name)
    }

    /// SHA-256 over the structural parts of the table (columns, keys, indexes).
    ///
    /// Comments are excluded; a changed hash means the shape of the table changed.
    pub fn structure_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for column in &self.columns {
            hasher.update(column.name.as_bytes());
            hasher.update(b":");
            hasher.update(column.data_type.as_bytes());
            hasher.update(if column.is_nullable { b"?" } else { b"!" });
            hasher.update(b";");
        }
        hasher.update(b"|pk=");
        hasher.update(self.primary_key.join(",").as_bytes());
        for fk in &self.foreign_keys {
            hasher.update(b"|fk=");
            hasher.update(fk.constrained_columns.join(",").as_bytes());
            hasher.update(b"->");
            hasher.update(fk.referred_table.as_bytes());
            hasher.update(b"(");
            hasher.update(fk.referred_columns.join(",").as_bytes());
            hasher.update(b")");
        }
        for unique in &self.unique_constraints {
            hasher.update(b"|uq=");
            hasher.update(unique.column_names.join(",").as_bytes());
        }
        for index in &self.indexes {
            hasher.update(b"|ix=");
            hasher.update(index.name.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Junction-table heuristic.
///
/// True iff the table has at least two foreign keys, a non-empty primary key
/// whose columns all take part in some foreign key, and no column outside the
/// set of foreign-key columns.
pub fn is_junction_table(
    columns: &[ColumnSchema],
    foreign_keys: &[ForeignKeySchema],
    primary_key: &[String],
) -> bool {
    if foreign_keys.len() < 2 || primary_key.is_empty() {
        return false;
    }

    let fk_columns: HashSet<&str> = foreign_keys
        .iter()
        .flat_map(|fk| fk.constrained_columns.iter().map(String::as_str))
        .collect();

    primary_key.iter().all(|c| fk_columns.contains(c.as_str()))
        && columns.iter().all(|c| fk_columns.contains(c.name.as_str()))
}
