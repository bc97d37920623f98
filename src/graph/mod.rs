//! Knowledge graph store: a labeled property graph persisted in SQLite.
//!
//! `Table` and `Column` nodes are keyed by `(label, name)`; edges are merged on
//! `(source, rel_type, target, edge_key)` so every write is repeatable.

pub mod loader;
pub mod migrate;
pub mod queries;
pub mod vector;

pub use loader::GraphLoader;
pub use vector::{cosine_similarity, VectorIndexSpec};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::task;

use crate::error::{GenesisError, Result};

pub const REL_HAS_COLUMN: &str = "HAS_COLUMN";
pub const REL_EXPLICIT_FK: &str = "EXPLICIT_FK_TO";
pub const REL_IMPLICIT: &str = "IMPLICIT_RELATION_TO";

/// Node label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeLabel {
    Table,
    Column,
}

impl NodeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Table => "Table",
            NodeLabel::Column => "Column",
        }
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeLabel {
    type Err = GenesisError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Table" => Ok(NodeLabel::Table),
            "Column" => Ok(NodeLabel::Column),
            other => Err(GenesisError::InvalidInput(format!("unknown node label: {}", other))),
        }
    }
}

/// A graph entity: one Table or Column node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    pub label: NodeLabel,
    /// `table` for tables, `table.column` for columns
    pub name: String,
}

impl Entity {
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            label: NodeLabel::Table,
            name: name.into(),
        }
    }

    pub fn column(table: &str, column: &str) -> Self {
        Self {
            label: NodeLabel::Column,
            name: format!("{}.{}", table, column),
        }
    }

    /// Split a column name into `(table, column)`.
    pub fn column_parts(&self) -> Option<(&str, &str)> {
        match self.label {
            NodeLabel::Column => self.name.split_once('.'),
            NodeLabel::Table => None,
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.label, self.name)
    }
}

/// Graph store connection manager
#[derive(Debug, Clone)]
pub struct GraphDb {
    path: PathBuf,
}

impl GraphDb {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
        }
    }

    /// Open the store and apply pending migrations.
    pub async fn open<P: AsRef<Path>, M: AsRef<Path>>(db_path: P, migrations_dir: M) -> Result<Self> {
        let graph = Self::new(db_path);
        let migrations_dir = migrations_dir.as_ref().to_path_buf();
        graph
            .with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
            .await?;
        Ok(graph)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new connection with the graph pragmas applied
    pub fn open_connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;

        // WAL so readers don't block the single writer; FKs for edge cascades
        conn.execute_batch(
            "PRAGMA journal_mode = WAL; \
             PRAGMA synchronous = NORMAL; \
             PRAGMA foreign_keys = ON; \
             PRAGMA temp_store = MEMORY;",
        )?;
        conn.busy_timeout(std::time::Duration::from_secs(10))?;

        Ok(conn)
    }

    /// Check that the store can be opened and queried.
    pub async fn ping(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.query_row("SELECT COUNT(*) FROM nodes", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }

    /// Execute a closure with a connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let graph = self.clone();
        task::spawn_blocking(move || {
            let mut conn = graph.open_connection()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| GenesisError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_graph;

    #[test]
    fn test_entity_names() {
        let column = Entity::column("order", "customer_id");
        assert_eq!(column.name, "order.customer_id");
        assert_eq!(column.column_parts(), Some(("order", "customer_id")));
        assert_eq!(column.to_string(), "Column:order.customer_id");
        assert_eq!(Entity::table("order").column_parts(), None);
    }

    #[test]
    fn test_label_round_trip_and_unknown() {
        assert_eq!("Table".parse::<NodeLabel>().unwrap(), NodeLabel::Table);
        assert!("Index".parse::<NodeLabel>().is_err());
    }

    #[tokio::test]
    async fn test_open_applies_migrations_and_pragmas() {
        let (graph, _temp) = test_graph().await;
        graph.ping().await.unwrap();
        graph
            .with_connection(|conn| {
                let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
                assert_eq!(journal_mode.to_uppercase(), "WAL");
                let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
                assert_eq!(foreign_keys, 1);
                Ok(())
            })
            .await
            .unwrap();
    }
}
