use async_trait::async_trait;
use rusqlite::Connection;

use super::{Analyzer, EvidenceChunk, NodeContext};
use crate::config::ProfilerConfig;
use crate::error::Result;
use crate::graph::NodeLabel;
use crate::source::{quote_ident, value_to_string};

const NAME: &str = "DataProfile";

/// Samples real column data from the relational source.
///
/// Always reports a few random non-null values. Columns that look categorical
/// (enough rows, few distinct values both absolutely and relative to the row
/// count) also get their sorted distinct values.
pub struct DataProfiler {
    config: ProfilerConfig,
}

impl DataProfiler {
    pub fn new(config: ProfilerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Analyzer for DataProfiler {
    fn name(&self) -> &str {
        NAME
    }

    async fn analyze(&self, context: &NodeContext) -> Option<EvidenceChunk> {
        if context.entity.label != NodeLabel::Column {
            return None;
        }
        let (table, column) = context.entity.column_parts()?;
        let Some(table_schema) = context.schema.table(table).filter(|t| t.column(column).is_some()) else {
            // SQLite may read an unknown quoted identifier as a string literal
            log::debug!("{} is not in the extracted schema; nothing to sample", context.entity);
            return None;
        };
        let schema_name = table_schema.schema_name.clone();
        let target = format!("{}.{}", quote_ident(&schema_name), quote_ident(table));
        let column = quote_ident(column);
        let config = self.config.clone();

        let profiled = context
            .source
            .with_connection(move |conn| Ok(profile(conn, &target, &column, &config)))
            .await;

        match profiled {
            Ok(chunk) => Some(chunk),
            Err(e) => {
                log::warn!("Data profiling failed for {}: {}", context.entity, e);
                None
            }
        }
    }
}

/// Categorical iff enough rows, distinct count under the absolute cap and the
/// distinct ratio under the relative cap.
pub fn is_likely_categorical(total_rows: u64, distinct_count: u64, config: &ProfilerConfig) -> bool {
    if total_rows < config.min_rows || distinct_count >= config.max_distinct_values {
        return false;
    }
    let ratio = if total_rows > 0 {
        distinct_count as f64 / total_rows as f64
    } else {
        0.0
    };
    ratio < config.max_distinct_ratio
}

fn profile(conn: &Connection, target: &str, column: &str, config: &ProfilerConfig) -> EvidenceChunk {
    let stats = conn.query_row(
        &format!("SELECT COUNT(*), COUNT(DISTINCT {column}) FROM {target}"),
        [],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
    );

    let (total_rows, distinct_count) = match stats {
        Ok((total, distinct)) => (total.max(0) as u64, distinct.max(0) as u64),
        Err(e) => {
            log::debug!("Stats query on {}.{} failed ({}), sampling only", target, column, e);
            let samples = fetch_samples(conn, target, column, config.sample_limit).unwrap_or_default();
            return build_chunk(&samples, None);
        }
    };

    let samples = fetch_samples(conn, target, column, config.sample_limit).unwrap_or_else(|e| {
        log::debug!("Sampling {}.{} failed: {}", target, column, e);
        Vec::new()
    });

    let distinct_values = if is_likely_categorical(total_rows, distinct_count, config) {
        match fetch_distinct(conn, target, column, config.max_distinct_values) {
            Ok(values) => Some(values),
            Err(e) => {
                log::debug!("Distinct query on {}.{} failed: {}", target, column, e);
                None
            }
        }
    } else {
        None
    };

    build_chunk(&samples, distinct_values.as_deref())
}

fn fetch_samples(conn: &Connection, target: &str, column: &str, limit: usize) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {column} FROM {target} WHERE {column} IS NOT NULL ORDER BY RANDOM() LIMIT ?1"
    ))?;
    let mut rows = stmt.query([limit as i64])?;
    let mut values = Vec::new();
    while let Some(row) = rows.next()? {
        values.push(value_to_string(row.get_ref(0)?));
    }
    Ok(values)
}

fn fetch_distinct(conn: &Connection, target: &str, column: &str, limit: u64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT {column} FROM {target} WHERE {column} IS NOT NULL LIMIT ?1"
    ))?;
    let mut rows = stmt.query([limit as i64])?;
    let mut values = Vec::new();
    while let Some(row) = rows.next()? {
        values.push(value_to_string(row.get_ref(0)?));
    }
    values.sort();
    Ok(values)
}

fn build_chunk(samples: &[String], distinct_values: Option<&[String]>) -> EvidenceChunk {
    let mut lines = Vec::new();
    if !samples.is_empty() {
        lines.push(format!("sample_values: {:?}", samples));
    }
    if let Some(values) = distinct_values.filter(|v| !v.is_empty()) {
        lines.push("cardinality_type: LOW_RELATIVE".to_string());
        lines.push(format!("distinct_values: {:?}", values));
    }
    if lines.is_empty() {
        lines.push("sample_values: [] # Column is likely empty or contains only NULLs.".to_string());
    }
    EvidenceChunk::new(NAME, lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Entity;
    use crate::testing::{profile_context, shop_context};

    fn profiler() -> DataProfiler {
        DataProfiler::new(ProfilerConfig::default())
    }

    fn sample_count(content: &str) -> usize {
        content
            .lines()
            .find(|l| l.starts_with("sample_values: "))
            .map(|l| l.matches('"').count() / 2)
            .unwrap_or(0)
    }

    #[test]
    fn test_categorical_thresholds() {
        let config = ProfilerConfig::default();
        assert!(is_likely_categorical(1000, 4, &config));
        assert!(!is_likely_categorical(1000, 500, &config));
        // too few rows
        assert!(!is_likely_categorical(49, 2, &config));
        // absolute cap
        assert!(!is_likely_categorical(100_000, 30, &config));
        // relative cap
        assert!(!is_likely_categorical(100, 10, &config));
    }

    #[tokio::test]
    async fn test_low_cardinality_column_lists_sorted_distinct_values() {
        let (context, _temp) = profile_context(Entity::column("ticket", "status")).await;
        let chunk = profiler().analyze(&context).await.unwrap();

        assert_eq!(chunk.analyzer_name, "DataProfile");
        assert!(chunk.content.contains("cardinality_type: LOW_RELATIVE"));
        assert!(chunk
            .content
            .contains("distinct_values: [\"archived\", \"closed\", \"open\", \"pending\"]"));
        assert_eq!(sample_count(&chunk.content), 5);
    }

    #[tokio::test]
    async fn test_high_cardinality_column_only_samples() {
        let (context, _temp) = profile_context(Entity::column("ticket", "code")).await;
        let chunk = profiler().analyze(&context).await.unwrap();

        assert!(!chunk.content.contains("distinct_values"));
        assert!(!chunk.content.contains("cardinality_type"));
        assert_eq!(chunk.content.lines().count(), 1);
        assert_eq!(sample_count(&chunk.content), 5);
    }

    #[tokio::test]
    async fn test_all_null_column_reports_empty() {
        let (context, _temp) = profile_context(Entity::column("ticket", "note")).await;
        let chunk = profiler().analyze(&context).await.unwrap();
        assert!(chunk.content.starts_with("sample_values: []"));
    }

    #[tokio::test]
    async fn test_small_table_is_never_categorical() {
        let (context, _temp) = shop_context(Entity::column("product", "sku")).await;
        let chunk = profiler().analyze(&context).await.unwrap();
        assert!(!chunk.content.contains("distinct_values"));
        assert!(chunk.content.starts_with("sample_values: "));
    }

    #[tokio::test]
    async fn test_unknown_column_gives_no_evidence() {
        let (context, _temp) = profile_context(Entity::column("ticket", "missing")).await;
        assert!(profiler().analyze(&context).await.is_none());

        let (context, _temp) = profile_context(Entity::column("no_such_table", "id")).await;
        assert!(profiler().analyze(&context).await.is_none());
    }

    #[tokio::test]
    async fn test_tables_are_skipped() {
        let (context, _temp) = profile_context(Entity::table("ticket")).await;
        assert!(profiler().analyze(&context).await.is_none());
    }
}
