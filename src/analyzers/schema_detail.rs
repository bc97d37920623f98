use async_trait::async_trait;

use super::{Analyzer, EvidenceChunk, NodeContext};
use crate::graph::NodeLabel;

/// Structural facts read straight from the extracted schema. No queries.
pub struct SchemaDetailAnalyzer;

const NAME: &str = "SchemaDetail";

#[async_trait]
impl Analyzer for SchemaDetailAnalyzer {
    fn name(&self) -> &str {
        NAME
    }

    async fn analyze(&self, context: &NodeContext) -> Option<EvidenceChunk> {
        match context.entity.label {
            NodeLabel::Table => {
                let table = context.schema.table(&context.entity.name)?;
                let mut lines = vec![
                    format!("primary_key: {:?}", table.primary_key),
                    format!("column_count: {}", table.columns.len()),
                    format!("foreign_key_count: {}", table.foreign_keys.len()),
                    format!("is_junction_table: {}", table.is_junction_table),
                ];
                for unique in &table.unique_constraints {
                    lines.push(format!("unique: {:?}", unique.column_names));
                }
                if let Some(comment) = &table.comment {
                    lines.push(format!("db_comment: '{}'", comment));
                }
                Some(EvidenceChunk::new(NAME, lines))
            }
            NodeLabel::Column => {
                let (table_name, column_name) = context.entity.column_parts()?;
                let table = context.schema.table(table_name)?;
                let column = table.column(column_name)?;

                let mut lines = vec![
                    format!("data_type: {}", column.data_type),
                    format!("is_nullable: {}", column.is_nullable),
                    format!("is_primary_key: {}", table.is_primary_key(column_name)),
                ];
                if let Some(comment) = &column.comment {
                    lines.push(format!("db_comment: '{}'", comment));
                }
                Some(EvidenceChunk::new(NAME, lines))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Entity;
    use crate::testing::shop_context;

    #[tokio::test]
    async fn test_table_detail() {
        let (context, _temp) = shop_context(Entity::table("order_product")).await;
        let chunk = SchemaDetailAnalyzer.analyze(&context).await.unwrap();
        assert_eq!(chunk.analyzer_name, "SchemaDetail");
        assert!(chunk.content.contains("primary_key: [\"order_id\", \"product_id\"]"));
        assert!(chunk.content.contains("foreign_key_count: 2"));
        assert!(chunk.content.contains("is_junction_table: true"));
    }

    #[tokio::test]
    async fn test_column_detail() {
        let (context, _temp) = shop_context(Entity::column("order", "placed_at")).await;
        let chunk = SchemaDetailAnalyzer.analyze(&context).await.unwrap();
        assert_eq!(
            chunk.content,
            "data_type: TEXT\nis_nullable: true\nis_primary_key: false"
        );
    }

    #[tokio::test]
    async fn test_unknown_entity_gives_nothing() {
        let (context, _temp) = shop_context(Entity::column("order", "missing")).await;
        assert!(SchemaDetailAnalyzer.analyze(&context).await.is_none());
        let (context, _temp) = shop_context(Entity::table("ghost")).await;
        assert!(SchemaDetailAnalyzer.analyze(&context).await.is_none());
    }
}
