//! Read-side graph queries used by the analyzers, the orchestrator and the relation finder.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::vector::decode_embedding;
use super::{Entity, GraphDb, NodeLabel, REL_EXPLICIT_FK, REL_IMPLICIT};
use crate::error::Result;

/// An EXPLICIT_FK_TO edge between two tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FkEdge {
    pub source_table: String,
    pub target_table: String,
    #[serde(default)]
    pub constrained_columns: Vec<String>,
    #[serde(default)]
    pub referred_columns: Vec<String>,
    #[serde(default)]
    pub on_update: Option<String>,
    #[serde(default)]
    pub on_delete: Option<String>,
}

/// Enrichment state of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEnrichment {
    pub is_enriched: bool,
    pub core_description: Option<String>,
    pub inferred_logic: Option<String>,
    pub stereotype: Option<String>,
    pub confidence: Option<f64>,
    pub embedding: Option<Vec<f32>>,
    pub last_enriched_at: Option<String>,
}

/// An enriched Table node together with the names of its columns.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedTable {
    pub name: String,
    pub core_description: String,
    pub stereotype: Option<String>,
    pub embedding: Vec<f32>,
    pub columns: Vec<String>,
}

/// A persisted IMPLICIT_RELATION_TO edge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImplicitEdge {
    pub source: String,
    pub target: String,
    pub relation_type: String,
    pub justification: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphCounts {
    pub nodes: usize,
    pub edges: usize,
}

/// Per-label enrichment coverage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelCoverage {
    pub label: String,
    pub total: usize,
    pub enriched: usize,
    pub with_embedding: usize,
}

/// Every entity already marked `is_enriched`.
pub async fn enriched_entities(graph: &GraphDb) -> Result<HashSet<Entity>> {
    graph
        .with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT label, name FROM nodes WHERE is_enriched = 1")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

            rows.into_iter()
                .map(|(label, name)| {
                    Ok(Entity {
                        label: label.parse()?,
                        name,
                    })
                })
                .collect()
        })
        .await
}

/// FK edges leaving `table`, ordered by target.
pub async fn outgoing_fks(graph: &GraphDb, table: &str) -> Result<Vec<FkEdge>> {
    let table = table.to_string();
    graph
        .with_connection(move |conn| fk_edges(conn, "source_name = ?2", &table))
        .await
}

/// FK edges pointing at `table`, ordered by source.
pub async fn incoming_fks(graph: &GraphDb, table: &str) -> Result<Vec<FkEdge>> {
    let table = table.to_string();
    graph
        .with_connection(move |conn| fk_edges(conn, "target_name = ?2", &table))
        .await
}

fn fk_edges(conn: &Connection, filter: &str, table: &str) -> Result<Vec<FkEdge>> {
    let sql = format!(
        "SELECT source_name, target_name, properties FROM edges \
         WHERE rel_type = ?1 AND source_label = 'Table' AND {} \
         ORDER BY source_name, target_name, edge_key",
        filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![REL_EXPLICIT_FK, table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

    let mut edges = Vec::with_capacity(rows.len());
    for (source_table, target_table, properties) in rows {
        let props: serde_json::Value = serde_json::from_str(&properties)?;
        let strings = |key: &str| -> Vec<String> {
            props[key]
                .as_array()
                .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                .unwrap_or_default()
        };
        edges.push(FkEdge {
            constrained_columns: strings("constrained_columns"),
            referred_columns: strings("referred_columns"),
            on_update: props["on_update"].as_str().map(String::from),
            on_delete: props["on_delete"].as_str().map(String::from),
            source_table,
            target_table,
        });
    }
    Ok(edges)
}

/// True when an explicit FK joins the two tables in either direction.
pub async fn fk_joined(graph: &GraphDb, a: &str, b: &str) -> Result<bool> {
    let (a, b) = (a.to_string(), b.to_string());
    graph
        .with_connection(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM edges WHERE rel_type = ?1 AND \
                     ((source_name = ?2 AND target_name = ?3) OR (source_name = ?3 AND target_name = ?2)) \
                     AND source_label = 'Table' AND target_label = 'Table' LIMIT 1",
                    params![REL_EXPLICIT_FK, a, b],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
}

/// All enriched Table nodes that carry a usable embedding, by name.
pub async fn enriched_tables(graph: &GraphDb) -> Result<Vec<EnrichedTable>> {
    graph
        .with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, core_description, stereotype, embedding FROM nodes \
                 WHERE label = 'Table' AND is_enriched = 1 AND embedding IS NOT NULL \
                 ORDER BY name",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

            let mut column_stmt = conn.prepare(
                "SELECT n.name FROM edges e \
                 JOIN nodes n ON n.label = e.target_label AND n.name = e.target_name \
                 WHERE e.rel_type = 'HAS_COLUMN' AND e.source_label = 'Table' AND e.source_name = ?1 \
                 ORDER BY json_extract(n.properties, '$.ordinal'), n.name",
            )?;

            let mut tables = Vec::with_capacity(rows.len());
            for (name, description, stereotype, blob) in rows {
                let Some(embedding) = decode_embedding(&blob) else {
                    log::warn!("Skipping table '{}': malformed embedding", name);
                    continue;
                };
                let prefix = format!("{}.", name);
                let columns = column_stmt
                    .query_map(params![name], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?
                    .into_iter()
                    .map(|c| c.strip_prefix(&prefix).map(String::from).unwrap_or(c))
                    .collect();

                tables.push(EnrichedTable {
                    name,
                    core_description: description.unwrap_or_default(),
                    stereotype,
                    embedding,
                    columns,
                });
            }
            Ok(tables)
        })
        .await
}

/// Enrichment properties of one node, or None if the node does not exist.
pub async fn enrichment_of(graph: &GraphDb, entity: &Entity) -> Result<Option<NodeEnrichment>> {
    let entity = entity.clone();
    graph
        .with_connection(move |conn| {
            let row = conn
                .query_row(
                    "SELECT is_enriched, core_description, inferred_logic, stereotype, confidence, \
                            embedding, last_enriched_at \
                     FROM nodes WHERE label = ?1 AND name = ?2",
                    params![entity.label.as_str(), entity.name],
                    |row| {
                        Ok(NodeEnrichment {
                            is_enriched: row.get::<_, i64>(0)? != 0,
                            core_description: row.get(1)?,
                            inferred_logic: row.get(2)?,
                            stereotype: row.get(3)?,
                            confidence: row.get(4)?,
                            embedding: row
                                .get::<_, Option<Vec<u8>>>(5)?
                                .and_then(|blob| decode_embedding(&blob)),
                            last_enriched_at: row.get(6)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await
}

/// Every IMPLICIT_RELATION_TO edge, ordered by source then target.
pub async fn implicit_relations(graph: &GraphDb) -> Result<Vec<ImplicitEdge>> {
    graph
        .with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT source_name, target_name, properties FROM edges \
                 WHERE rel_type = ?1 ORDER BY source_name, target_name",
            )?;
            let rows = stmt
                .query_map(params![REL_IMPLICIT], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

            let mut edges = Vec::with_capacity(rows.len());
            for (source, target, properties) in rows {
                let props: serde_json::Value = serde_json::from_str(&properties)?;
                edges.push(ImplicitEdge {
                    source,
                    target,
                    relation_type: props["type"].as_str().unwrap_or_default().to_string(),
                    justification: props["justification"].as_str().unwrap_or_default().to_string(),
                    confidence: props["confidence"].as_f64().unwrap_or_default(),
                });
            }
            Ok(edges)
        })
        .await
}

pub async fn graph_counts(graph: &GraphDb) -> Result<GraphCounts> {
    graph
        .with_connection(|conn| {
            let nodes: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
            let edges: i64 = conn.query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?;
            Ok(GraphCounts {
                nodes: nodes as usize,
                edges: edges as usize,
            })
        })
        .await
}

/// Node totals, enriched counts and embedding counts per label.
pub async fn label_coverage(graph: &GraphDb) -> Result<Vec<LabelCoverage>> {
    graph
        .with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT label, COUNT(*), SUM(is_enriched), \
                        SUM(CASE WHEN embedding IS NULL THEN 0 ELSE 1 END) \
                 FROM nodes GROUP BY label ORDER BY label",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(LabelCoverage {
                        label: row.get(0)?,
                        total: row.get::<_, i64>(1)? as usize,
                        enriched: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as usize,
                        with_embedding: row.get::<_, Option<i64>>(3)?.unwrap_or(0) as usize,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
            Ok(rows)
        })
        .await
}

/// Any one node of `label` with a stored embedding, lowest name first.
pub async fn sample_embedding(graph: &GraphDb, label: NodeLabel) -> Result<Option<(String, Vec<f32>)>> {
    graph
        .with_connection(move |conn| {
            let row: Option<(String, Vec<u8>)> = conn
                .query_row(
                    "SELECT name, embedding FROM nodes \
                     WHERE label = ?1 AND embedding IS NOT NULL AND is_enriched = 1 ORDER BY name LIMIT 1",
                    params![label.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(row.and_then(|(name, blob)| decode_embedding(&blob).map(|e| (name, e))))
        })
        .await
}
