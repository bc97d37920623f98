use async_trait::async_trait;

use super::{Analyzer, EvidenceChunk, NodeContext};
use crate::error::Result;
use crate::graph::{queries, GraphDb, NodeLabel};

const NAME: &str = "KnowledgeGraphContext";

/// Incoming sources listed for a table
const MAX_INCOMING: usize = 5;

/// Structural neighbours already present in the graph.
pub struct GraphContextAnalyzer;

#[async_trait]
impl Analyzer for GraphContextAnalyzer {
    fn name(&self) -> &str {
        NAME
    }

    async fn analyze(&self, context: &NodeContext) -> Option<EvidenceChunk> {
        let clues = match context.entity.label {
            NodeLabel::Table => table_clues(&context.graph, &context.entity.name).await,
            NodeLabel::Column => {
                let (table, column) = context.entity.column_parts()?;
                column_clues(&context.graph, table, column).await
            }
        };

        match clues {
            Ok(clues) if !clues.is_empty() => Some(EvidenceChunk::new(NAME, clues)),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Graph context lookup failed for {}: {}", context.entity, e);
                None
            }
        }
    }
}

async fn table_clues(graph: &GraphDb, table: &str) -> Result<Vec<String>> {
    let mut clues = Vec::new();
    for edge in queries::outgoing_fks(graph, table).await? {
        match &edge.on_delete {
            Some(rule) => clues.push(format!("relation_out: {} (on_delete: {})", edge.target_table, rule)),
            None => clues.push(format!("relation_out: {}", edge.target_table)),
        }
    }

    let incoming = queries::incoming_fks(graph, table).await?;
    if !incoming.is_empty() {
        let sources: Vec<&str> = incoming
            .iter()
            .take(MAX_INCOMING)
            .map(|e| e.source_table.as_str())
            .collect();
        clues.push(format!("relation_in: {:?}", sources));
    }
    Ok(clues)
}

async fn column_clues(graph: &GraphDb, table: &str, column: &str) -> Result<Vec<String>> {
    let clues = queries::outgoing_fks(graph, table)
        .await?
        .into_iter()
        .filter_map(|edge| {
            let position = edge.constrained_columns.iter().position(|c| c == column)?;
            // Positional mapping into the referred columns; report only the table if it is off
            Some(match edge.referred_columns.get(position) {
                Some(target_column) => format!("fk_to: {}.{}", edge.target_table, target_column),
                None => format!("fk_to: {}", edge.target_table),
            })
        })
        .collect();
    Ok(clues)
}
