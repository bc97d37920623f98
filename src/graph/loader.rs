//! Materializes an extracted schema into the graph and writes enrichment back.
//!
//! Every write merges on the node/edge key, so loading the same schema twice
//! leaves node and edge counts unchanged.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Transaction};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

use super::vector::{create_vector_index, encode_embedding, VectorIndexSpec};
use super::{Entity, GraphDb, NodeLabel, REL_EXPLICIT_FK, REL_HAS_COLUMN, REL_IMPLICIT};
use crate::error::{GenesisError, Result};
use crate::models::{CoreDescription, ImplicitRelation};
use crate::schema::{DatabaseSchema, ForeignKeySchema, TableSchema};

/// Counters for one scaffold load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadStats {
    pub tables: usize,
    pub columns: usize,
    pub fk_edges: usize,
    /// FK edges whose referred table is not part of this extraction
    pub unresolved_fk_edges: usize,
    /// Tables whose structure changed since the last load (enrichment reset)
    pub drifted_tables: Vec<String>,
}

/// Writes the structural scaffold and enrichment properties into the graph.
#[derive(Debug, Clone)]
pub struct GraphLoader {
    graph: GraphDb,
}

impl GraphLoader {
    pub fn new(graph: GraphDb) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &GraphDb {
        &self.graph
    }

    /// Load the structural scaffold; with `clean_db` the whole graph is wiped first.
    ///
    /// The scaffold is written in a single transaction.
    pub async fn load_schema(&self, schema: &DatabaseSchema, clean_db: bool) -> Result<LoadStats> {
        if clean_db {
            self.clear_graph().await?;
        }

        log::info!("Loading {} tables into the knowledge graph...", schema.tables.len());
        let schema = schema.clone();
        let stats = self
            .graph
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                let stats = write_scaffold(&tx, &schema)?;
                tx.commit()?;
                Ok(stats)
            })
            .await?;

        for table in &stats.drifted_tables {
            log::warn!("Structure of '{}' changed since last load; it will be re-enriched", table);
        }
        if stats.unresolved_fk_edges > 0 {
            log::info!(
                "{} foreign keys point outside the extracted schema and were not linked",
                stats.unresolved_fk_edges
            );
        }
        log::info!(
            "Structural scaffold loaded: {} tables, {} columns, {} foreign-key edges",
            stats.tables,
            stats.columns,
            stats.fk_edges
        );
        Ok(stats)
    }

    /// Wipe every node and edge. Irreversible; vector index registrations are kept.
    pub async fn clear_graph(&self) -> Result<()> {
        log::warn!("Wiping entire knowledge graph at {}", self.graph.path().display());
        self.graph
            .with_connection(|conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM edges", [])?;
                tx.execute("DELETE FROM nodes", [])?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        log::info!("Knowledge graph wiped clean");
        Ok(())
    }

    /// Write description, embedding, `is_enriched` and timestamp onto one node.
    ///
    /// One UPDATE statement: either every enrichment property lands or none does.
    pub async fn update_node_enrichment(
        &self,
        entity: &Entity,
        description: &CoreDescription,
        embedding: &[f32],
    ) -> Result<()> {
        let entity = entity.clone();
        let description = description.clone();
        let blob = encode_embedding(embedding);
        let enriched_at = Utc::now().to_rfc3339();

        self.graph
            .with_connection(move |conn| {
                let rows_affected = conn.execute(
                    "UPDATE nodes SET \
                        core_description = ?1, \
                        inferred_logic = ?2, \
                        stereotype = ?3, \
                        confidence = ?4, \
                        embedding = ?5, \
                        is_enriched = 1, \
                        last_enriched_at = ?6 \
                     WHERE label = ?7 AND name = ?8",
                    params![
                        description.core_description,
                        description.inferred_logic,
                        description.stereotype.as_str(),
                        description.confidence,
                        blob,
                        enriched_at,
                        entity.label.as_str(),
                        entity.name,
                    ],
                )?;

                if rows_affected == 0 {
                    return Err(GenesisError::NodeNotFound(entity.to_string()));
                }
                Ok(())
            })
            .await
    }

    /// Provision the Table and Column cosine indexes; a no-op for indexes that exist.
    pub async fn create_vector_indexes(&self, dimensions: usize) -> Result<()> {
        for spec in VectorIndexSpec::defaults(dimensions) {
            if create_vector_index(&self.graph, &spec).await? {
                log::info!(
                    "Created vector index '{}' for :{} nodes ({} dims, {})",
                    spec.name,
                    spec.label,
                    spec.dimensions,
                    spec.similarity
                );
            } else {
                log::debug!("Vector index '{}' already exists", spec.name);
            }
        }
        Ok(())
    }

    /// Merge a directed IMPLICIT_RELATION_TO edge between two Table nodes.
    pub async fn create_implicit_relation(
        &self,
        source_table: &str,
        target_table: &str,
        relation: &ImplicitRelation,
    ) -> Result<()> {
        let source = source_table.to_string();
        let target = target_table.to_string();
        let properties = json!({
            "type": relation.effective_type(),
            "justification": relation.justification,
            "confidence": relation.confidence_score,
        })
        .to_string();

        self.graph
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                for name in [&source, &target] {
                    if !node_exists(&tx, NodeLabel::Table, name)? {
                        return Err(GenesisError::NodeNotFound(Entity::table(name.as_str()).to_string()));
                    }
                }
                merge_edge(
                    &tx,
                    (NodeLabel::Table, &source),
                    REL_IMPLICIT,
                    (NodeLabel::Table, &target),
                    "",
                    &properties,
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
    }
}

fn write_scaffold(tx: &Transaction<'_>, schema: &DatabaseSchema) -> Result<LoadStats> {
    let mut stats = LoadStats::default();

    for table in &schema.tables {
        if merge_table_node(tx, table)? {
            stats.drifted_tables.push(table.table_name.clone());
        }
        stats.tables += 1;

        for (ordinal, column) in table.columns.iter().enumerate() {
            let column_name = table.column_node_name(&column.name);
            let properties = json!({
                "table_name": table.table_name,
                "data_type": column.data_type,
                "is_nullable": column.is_nullable,
                "comment": column.comment,
                "is_primary_key": table.is_primary_key(&column.name),
                "ordinal": ordinal,
            })
            .to_string();
            merge_node(tx, NodeLabel::Column, &column_name, &properties)?;
            merge_edge(
                tx,
                (NodeLabel::Table, &table.table_name),
                REL_HAS_COLUMN,
                (NodeLabel::Column, &column_name),
                "",
                "{}",
            )?;
            stats.columns += 1;
        }
    }

    let extracted: HashSet<&str> = schema.tables.iter().map(|t| t.table_name.as_str()).collect();
    for table in &schema.tables {
        for fk in &table.foreign_keys {
            if !extracted.contains(fk.referred_table.as_str()) {
                log::debug!(
                    "FK {}({}) -> {} not linked: referred table not extracted",
                    table.table_name,
                    fk.constrained_columns.join(", "),
                    fk.referred_table
                );
                stats.unresolved_fk_edges += 1;
                continue;
            }
            merge_edge(
                tx,
                (NodeLabel::Table, &table.table_name),
                REL_EXPLICIT_FK,
                (NodeLabel::Table, &fk.referred_table),
                &fk_edge_key(fk),
                &fk_properties(fk),
            )?;
            stats.fk_edges += 1;
        }
    }

    Ok(stats)
}

/// Merge a Table node; returns true when an existing node's structure hash changed.
fn merge_table_node(tx: &Transaction<'_>, table: &TableSchema) -> Result<bool> {
    let structure_hash = table.structure_hash();
    let previous_hash: Option<Option<String>> = tx
        .query_row(
            "SELECT json_extract(properties, '$.structure_hash') FROM nodes \
             WHERE label = 'Table' AND name = ?1",
            params![table.table_name],
            |row| row.get(0),
        )
        .optional()?;

    let properties = json!({
        "schema": table.schema_name,
        "comment": table.comment,
        "primary_key": table.primary_key,
        "unique_constraints": table.unique_constraints.iter().map(|u| &u.name).collect::<Vec<_>>(),
        "indexes": table.indexes.iter().map(|i| &i.name).collect::<Vec<_>>(),
        "is_junction_table": table.is_junction_table,
        "column_count": table.columns.len(),
        "structure_hash": structure_hash,
    })
    .to_string();
    merge_node(tx, NodeLabel::Table, &table.table_name, &properties)?;

    let drifted = matches!(previous_hash, Some(Some(ref old)) if *old != structure_hash);
    if drifted {
        tx.execute(
            "UPDATE nodes SET is_enriched = 0 WHERE label = 'Table' AND name = ?1",
            params![table.table_name],
        )?;
    }
    Ok(drifted)
}

/// Insert a node or refresh its structural properties; enrichment columns are untouched.
fn merge_node(tx: &Transaction<'_>, label: NodeLabel, name: &str, properties: &str) -> Result<()> {
    tx.execute(
        "INSERT INTO nodes (label, name, properties) VALUES (?1, ?2, ?3) \
         ON CONFLICT(label, name) DO UPDATE SET properties = excluded.properties",
        params![label.as_str(), name, properties],
    )?;
    Ok(())
}

fn merge_edge(
    tx: &Transaction<'_>,
    source: (NodeLabel, &str),
    rel_type: &str,
    target: (NodeLabel, &str),
    edge_key: &str,
    properties: &str,
) -> Result<()> {
    tx.execute(
        "INSERT INTO edges \
            (edge_id, source_label, source_name, rel_type, target_label, target_name, edge_key, properties) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
         ON CONFLICT(source_label, source_name, rel_type, target_label, target_name, edge_key) \
         DO UPDATE SET properties = excluded.properties",
        params![
            Uuid::new_v4().to_string(),
            source.0.as_str(),
            source.1,
            rel_type,
            target.0.as_str(),
            target.1,
            edge_key,
            properties,
        ],
    )?;
    Ok(())
}

fn node_exists(tx: &Transaction<'_>, label: NodeLabel, name: &str) -> Result<bool> {
    let found: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM nodes WHERE label = ?1 AND name = ?2",
            params![label.as_str(), name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Parallel FKs between the same pair of tables are told apart by their local columns.
fn fk_edge_key(fk: &ForeignKeySchema) -> String {
    fk.constrained_columns.join(",")
}

fn fk_properties(fk: &ForeignKeySchema) -> String {
    json!({
        "constrained_columns": fk.constrained_columns,
        "referred_columns": fk.referred_columns,
        "on_update": fk.on_update,
        "on_delete": fk.on_delete,
    })
    .to_string()
}
