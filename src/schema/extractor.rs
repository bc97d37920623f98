//! Schema extraction from the relational source via SQLite introspection pragmas.

use rusqlite::{params, Connection};
use std::collections::BTreeMap;

use super::{
    is_junction_table, ColumnSchema, DatabaseSchema, ForeignKeySchema, IndexSchema, SkippedTable,
    TableSchema, UniqueConstraintSchema,
};
use crate::error::{GenesisError, Result};
use crate::source::{quote_ident, SourceDb};

/// Reads structural metadata from the relational source. Never writes.
pub struct SchemaExtractor {
    source: SourceDb,
}

impl SchemaExtractor {
    pub fn new(source: SourceDb) -> Self {
        Self { source }
    }

    /// Extract all tables of `schema_name` into a [`DatabaseSchema`].
    ///
    /// A table whose metadata cannot be read is retried once and then reported in
    /// `skipped_tables`; the remaining tables are still extracted. Failing to list
    /// the tables at all is a hard error.
    pub async fn extract(&self, schema_name: &str) -> Result<DatabaseSchema> {
        log::info!(
            "Starting schema extraction from '{}' ({})",
            schema_name,
            self.source.path().display()
        );
        let schema_name = schema_name.to_string();

        let db_schema = self
            .source
            .with_connection(move |conn| extract_schema(conn, &schema_name))
            .await?;

        let junctions = db_schema.tables.iter().filter(|t| t.is_junction_table).count();
        log::info!(
            "Schema extraction completed: {} tables, {} columns, {} junction tables, {} skipped",
            db_schema.tables.len(),
            db_schema.column_count(),
            junctions,
            db_schema.skipped_tables.len()
        );
        Ok(db_schema)
    }
}

fn extract_schema(conn: &Connection, schema_name: &str) -> Result<DatabaseSchema> {
    let table_names = list_tables(conn, schema_name)?;
    log::info!("Found {} tables. Inspecting each one...", table_names.len());

    let mut db_schema = DatabaseSchema::default();
    for table_name in table_names {
        let table = read_table(conn, schema_name, &table_name).or_else(|first| {
            log::warn!("Reading table '{}' failed ({}), retrying once", table_name, first);
            read_table(conn, schema_name, &table_name)
        });

        match table {
            Ok(table) => {
                if table.is_junction_table {
                    log::debug!("Detected '{}' as a junction table", table.table_name);
                }
                log::debug!("Inspected table '{}'", table.table_name);
                db_schema.tables.push(table);
            }
            Err(e) => {
                log::error!("Skipping table '{}': {}", table_name, e);
                db_schema.skipped_tables.push(SkippedTable {
                    table_name,
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(db_schema)
}

fn list_tables(conn: &Connection, schema_name: &str) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT name FROM {}.sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
         ORDER BY name",
        quote_ident(schema_name)
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| GenesisError::Extraction(format!("cannot list tables of '{}': {}", schema_name, e)))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(names)
}

fn read_table(conn: &Connection, schema_name: &str, table_name: &str) -> Result<TableSchema> {
    let (columns, primary_key) = read_columns(conn, schema_name, table_name)?;
    if columns.is_empty() {
        return Err(GenesisError::Extraction(format!(
            "table '{}' reported no columns",
            table_name
        )));
    }
    let foreign_keys = read_foreign_keys(conn, schema_name, table_name)?;
    let (unique_constraints, indexes) = read_indexes(conn, schema_name, table_name)?;
    let is_junction = is_junction_table(&columns, &foreign_keys, &primary_key);

    Ok(TableSchema {
        schema_name: schema_name.to_string(),
        table_name: table_name.to_string(),
        columns,
        foreign_keys,
        primary_key,
        unique_constraints,
        indexes,
        comment: None,
        is_junction_table: is_junction,
    })
}

/// Columns in declaration order plus primary key columns in key order.
fn read_columns(
    conn: &Connection,
    schema_name: &str,
    table_name: &str,
) -> Result<(Vec<ColumnSchema>, Vec<String>)> {
    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1, ?2) ORDER BY cid",
    )?;
    let mut rows = stmt.query(params![table_name, schema_name])?;

    let mut columns = Vec::new();
    let mut pk_positions: Vec<(i64, String)> = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        let data_type: String = row.get::<_, Option<String>>(1)?.unwrap_or_default();
        let not_null: i64 = row.get(2)?;
        let pk: i64 = row.get(3)?;

        if pk > 0 {
            pk_positions.push((pk, name.clone()));
        }
        columns.push(ColumnSchema {
            name,
            data_type,
            is_nullable: not_null == 0 && pk == 0,
            comment: None,
        });
    }

    pk_positions.sort_by_key(|(pos, _)| *pos);
    let primary_key = pk_positions.into_iter().map(|(_, name)| name).collect();
    Ok((columns, primary_key))
}

fn read_foreign_keys(
    conn: &Connection,
    schema_name: &str,
    table_name: &str,
) -> Result<Vec<ForeignKeySchema>> {
    let mut stmt = conn.prepare(
        "SELECT id, \"table\", \"from\", \"to\", on_update, on_delete \
         FROM pragma_foreign_key_list(?1, ?2) ORDER BY id, seq",
    )?;
    let mut rows = stmt.query(params![table_name, schema_name])?;

    struct PendingFk {
        referred_table: String,
        from: Vec<String>,
        to: Vec<Option<String>>,
        on_update: Option<String>,
        on_delete: Option<String>,
    }

    let mut grouped: BTreeMap<i64, PendingFk> = BTreeMap::new();
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let referred_table: String = row.get(1)?;
        let from: String = row.get(2)?;
        let to: Option<String> = row.get(3)?;
        let on_update: Option<String> = row.get(4)?;
        let on_delete: Option<String> = row.get(5)?;

        let entry = grouped.entry(id).or_insert_with(|| PendingFk {
            referred_table,
            from: Vec::new(),
            to: Vec::new(),
            on_update: normalize_action(on_update),
            on_delete: normalize_action(on_delete),
        });
        entry.from.push(from);
        entry.to.push(to);
    }

    let mut foreign_keys = Vec::with_capacity(grouped.len());
    for (_, pending) in grouped {
        // `REFERENCES parent` without a column list targets the parent's primary key
        let referred_columns = if pending.to.iter().all(Option::is_some) {
            pending.to.into_iter().flatten().collect()
        } else {
            read_columns(conn, schema_name, &pending.referred_table)
                .map(|(_, pk)| pk)
                .unwrap_or_default()
        };

        foreign_keys.push(ForeignKeySchema {
            constrained_columns: pending.from,
            referred_schema: schema_name.to_string(),
            referred_table: pending.referred_table,
            referred_columns,
            on_update: pending.on_update,
            on_delete: pending.on_delete,
        });
    }

    Ok(foreign_keys)
}

fn normalize_action(action: Option<String>) -> Option<String> {
    action
        .map(|a| a.trim().to_uppercase())
        .filter(|a| !a.is_empty() && a != "NO ACTION")
}

fn read_indexes(
    conn: &Connection,
    schema_name: &str,
    table_name: &str,
) -> Result<(Vec<UniqueConstraintSchema>, Vec<IndexSchema>)> {
    let mut stmt = conn.prepare(
        "SELECT name, \"unique\", origin FROM pragma_index_list(?1, ?2) ORDER BY name",
    )?;
    let entries = stmt
        .query_map(params![table_name, schema_name], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)? != 0,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

    let mut unique_constraints = Vec::new();
    let mut indexes = Vec::new();
    for (name, unique, origin) in entries {
        let column_names = read_index_columns(conn, schema_name, &name)?;
        match origin.as_str() {
            "u" => unique_constraints.push(UniqueConstraintSchema { name, column_names }),
            "c" => indexes.push(IndexSchema {
                name,
                column_names,
                unique,
            }),
            // "pk": the primary key is reported separately
            _ => {}
        }
    }

    Ok((unique_constraints, indexes))
}

fn read_index_columns(conn: &Connection, schema_name: &str, index_name: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT name FROM pragma_index_info(?1, ?2) ORDER BY seqno")?;
    let names = stmt
        .query_map(params![index_name, schema_name], |row| row.get::<_, Option<String>>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    // Expression index members have no column name
    Ok(names.into_iter().flatten().collect())
}
