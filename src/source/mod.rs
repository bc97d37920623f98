//! Read-only access to the relational source database.

use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use tokio::task;

use crate::error::{GenesisError, Result};

/// Relational source connection manager (SQLite, read-only)
#[derive(Debug, Clone)]
pub struct SourceDb {
    path: PathBuf,
}

impl SourceDb {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a read-only connection; the source is never mutated.
    pub fn open_connection(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Check that the source can be opened and queried.
    pub async fn ping(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }

    /// Execute a closure with a read-only connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let source = self.clone();
        task::spawn_blocking(move || {
            let conn = source.open_connection()?;
            f(&conn)
        })
        .await
        .map_err(|e| GenesisError::Task(e.to_string()))?
    }
}

/// Quote an SQL identifier (`"name"`, inner quotes doubled).
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Render an SQLite value as evidence text.
pub fn value_to_string(value: rusqlite::types::ValueRef<'_>) -> String {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => format!("<blob {} bytes>", b.len()),
    }
}
