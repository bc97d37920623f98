//! Vector indexes over node embeddings (cosine similarity, scored in process).

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{GraphDb, NodeLabel};
use crate::error::{GenesisError, Result};

pub const TABLE_INDEX: &str = "table_embeddings";
pub const COLUMN_INDEX: &str = "column_embeddings";

/// A registered similarity-search index over one node label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndexSpec {
    pub name: String,
    pub label: NodeLabel,
    pub property: String,
    pub dimensions: usize,
    pub similarity: String,
}

impl VectorIndexSpec {
    pub fn cosine(name: &str, label: NodeLabel, dimensions: usize) -> Self {
        Self {
            name: name.to_string(),
            label,
            property: "embedding".to_string(),
            dimensions,
            similarity: "cosine".to_string(),
        }
    }

    /// The two indexes the pipeline maintains: one per node label.
    pub fn defaults(dimensions: usize) -> [Self; 2] {
        [
            Self::cosine(TABLE_INDEX, NodeLabel::Table, dimensions),
            Self::cosine(COLUMN_INDEX, NodeLabel::Column, dimensions),
        ]
    }
}

/// A node returned by a similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarNode {
    pub name: String,
    pub score: f32,
}

/// Encode an embedding as a little-endian f32 BLOB
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Parse embedding BLOB to Vec<f32>; None if the length is not a multiple of 4
pub fn decode_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }

    blob.chunks(4)
        .map(|bytes| {
            let arr: [u8; 4] = bytes.try_into().ok()?;
            Some(f32::from_le_bytes(arr))
        })
        .collect()
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 when either vector has zero magnitude or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Register an index. Returns false (and changes nothing) if it already exists.
pub async fn create_vector_index(graph: &GraphDb, spec: &VectorIndexSpec) -> Result<bool> {
    let spec = spec.clone();
    graph
        .with_connection(move |conn| {
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT dimensions FROM vector_indexes WHERE name = ?1",
                    params![spec.name],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(dimensions) = existing {
                if dimensions as usize != spec.dimensions {
                    log::warn!(
                        "Vector index '{}' exists with {} dimensions (configured {}); leaving it as is",
                        spec.name,
                        dimensions,
                        spec.dimensions
                    );
                }
                return Ok(false);
            }

            conn.execute(
                "INSERT INTO vector_indexes (name, label, property, dimensions, similarity) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    spec.name,
                    spec.label.as_str(),
                    spec.property,
                    spec.dimensions as i64,
                    spec.similarity
                ],
            )?;
            Ok(true)
        })
        .await
}

/// All registered indexes, by name
pub async fn list_vector_indexes(graph: &GraphDb) -> Result<Vec<VectorIndexSpec>> {
    graph
        .with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, label, property, dimensions, similarity FROM vector_indexes ORDER BY name",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

            rows.into_iter()
                .map(|(name, label, property, dimensions, similarity)| {
                    Ok(VectorIndexSpec {
                        name,
                        label: label.parse()?,
                        property,
                        dimensions: dimensions as usize,
                        similarity,
                    })
                })
                .collect()
        })
        .await
}

/// Top-`k` enriched nodes of the index's label by cosine similarity to `vector`, best first.
///
/// A node whose enrichment was reset keeps its old embedding; it is not a candidate.
pub async fn query_similar(
    graph: &GraphDb,
    index_name: &str,
    k: usize,
    vector: &[f32],
) -> Result<Vec<SimilarNode>> {
    let index_name = index_name.to_string();
    let query_vec = vector.to_vec();

    graph
        .with_connection(move |conn| {
            let spec: Option<(String, i64)> = conn
                .query_row(
                    "SELECT label, dimensions FROM vector_indexes WHERE name = ?1",
                    params![index_name],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let (label, dimensions) = spec.ok_or_else(|| {
                GenesisError::Graph(format!("vector index '{}' does not exist", index_name))
            })?;
            let dimensions = dimensions as usize;

            if query_vec.len() != dimensions {
                return Err(GenesisError::InvalidInput(format!(
                    "query vector has {} dimensions, index '{}' expects {}",
                    query_vec.len(),
                    index_name,
                    dimensions
                )));
            }

            let mut stmt = conn.prepare(
                "SELECT name, embedding FROM nodes \
                 WHERE label = ?1 AND embedding IS NOT NULL AND is_enriched = 1",
            )?;
            let mut rows = stmt.query(params![label])?;
            let mut scored = Vec::new();
            while let Some(row) = rows.next()? {
                let name: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                let embedding = match decode_embedding(&blob) {
                    Some(e) if e.len() == dimensions => e,
                    _ => continue,
                };
                scored.push(SimilarNode {
                    score: cosine_similarity(&query_vec, &embedding),
                    name,
                });
            }

            scored.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.name.cmp(&b.name))
            });
            scored.truncate(k);
            Ok(scored)
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{set_embedding, test_graph, unit_vector};

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_and_mismatch() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_embedding_blob_codec() {
        let floats: Vec<f32> = (0..1536).map(|i| i as f32 * 0.001).collect();
        let decoded = decode_embedding(&encode_embedding(&floats)).unwrap();
        assert_eq!(decoded.len(), 1536);
        assert!((decoded[1000] - 1.0).abs() < 1e-6);
        assert!(decode_embedding(&[0u8, 1, 2]).is_none());
    }

    #[tokio::test]
    async fn test_create_vector_index_is_idempotent() {
        let (graph, _temp) = test_graph().await;
        let [table_spec, column_spec] = VectorIndexSpec::defaults(8);
        assert!(create_vector_index(&graph, &table_spec).await.unwrap());
        assert!(!create_vector_index(&graph, &table_spec).await.unwrap());
        assert!(create_vector_index(&graph, &column_spec).await.unwrap());

        let names: Vec<_> = list_vector_indexes(&graph)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec![COLUMN_INDEX, TABLE_INDEX]);
    }

    #[tokio::test]
    async fn test_query_similar_is_scoped_by_label_and_ranked() {
        let (graph, _temp) = test_graph().await;
        for spec in VectorIndexSpec::defaults(4) {
            create_vector_index(&graph, &spec).await.unwrap();
        }
        set_embedding(&graph, NodeLabel::Table, "a", &unit_vector(4, 0)).await;
        set_embedding(&graph, NodeLabel::Table, "b", &[0.9, 0.1, 0.0, 0.0]).await;
        set_embedding(&graph, NodeLabel::Table, "c", &unit_vector(4, 2)).await;
        set_embedding(&graph, NodeLabel::Column, "a.id", &unit_vector(4, 0)).await;

        let hits = query_similar(&graph, TABLE_INDEX, 2, &unit_vector(4, 0)).await.unwrap();
        let names: Vec<_> = hits.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_query_similar_ignores_reset_enrichment() {
        let (graph, _temp) = test_graph().await;
        for spec in VectorIndexSpec::defaults(4) {
            create_vector_index(&graph, &spec).await.unwrap();
        }
        set_embedding(&graph, NodeLabel::Table, "a", &unit_vector(4, 0)).await;
        set_embedding(&graph, NodeLabel::Table, "stale", &unit_vector(4, 0)).await;
        graph
            .with_connection(|conn| {
                conn.execute("UPDATE nodes SET is_enriched = 0 WHERE name = 'stale'", [])?;
                Ok(())
            })
            .await
            .unwrap();

        let hits = query_similar(&graph, TABLE_INDEX, 5, &unit_vector(4, 0)).await.unwrap();
        let names: Vec<_> = hits.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["a"]);
    }

    #[tokio::test]
    async fn test_query_missing_index_fails() {
        let (graph, _temp) = test_graph().await;
        let result = query_similar(&graph, TABLE_INDEX, 3, &[1.0]).await;
        assert!(matches!(result, Err(GenesisError::Graph(_))));
    }
}
