//! Versioned SQL migrations for the graph store.
//!
//! Files are named `NNN_description.sql` and applied in version order, each in
//! its own transaction. The SHA-256 of every applied file is recorded so an
//! edited migration is reported instead of silently ignored.

use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{GenesisError, Result};

struct Migration {
    version: u32,
    name: String,
    sql: String,
}

impl Migration {
    fn checksum(&self) -> String {
        format!("{:x}", Sha256::digest(self.sql.as_bytes()))
    }
}

/// An applied migration as recorded in `schema_migrations`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub name: String,
    pub checksum: String,
}

fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            checksum TEXT NOT NULL DEFAULT '',
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Applied migrations keyed by version
pub fn applied_migrations(conn: &Connection) -> Result<BTreeMap<u32, AppliedMigration>> {
    let mut stmt = conn.prepare("SELECT version, name, checksum FROM schema_migrations ORDER BY version")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                AppliedMigration {
                    name: row.get(1)?,
                    checksum: row.get(2)?,
                },
            ))
        })?
        .collect::<std::result::Result<BTreeMap<_, _>, rusqlite::Error>>()?;
    Ok(rows)
}

fn parse_version(filename: &str) -> Result<u32> {
    let (prefix, _) = filename
        .split_once('_')
        .ok_or_else(|| GenesisError::Config(format!("Migration '{}' is not named NNN_description.sql", filename)))?;
    prefix
        .parse()
        .map_err(|_| GenesisError::Config(format!("Invalid migration version in '{}'", filename)))
}

fn load_migrations(migrations_dir: &Path) -> Result<Vec<Migration>> {
    let entries = fs::read_dir(migrations_dir).map_err(|e| {
        GenesisError::Config(format!(
            "Cannot read migrations directory {}: {}",
            migrations_dir.display(),
            e
        ))
    })?;

    let mut by_version: BTreeMap<u32, Migration> = BTreeMap::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("sql") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|n| n.to_str()).map(String::from) else {
            continue;
        };

        let version = parse_version(&name)?;
        let sql = fs::read_to_string(&path)?;
        if let Some(existing) = by_version.get(&version) {
            return Err(GenesisError::Config(format!(
                "Migrations '{}' and '{}' share version {}",
                existing.name, name, version
            )));
        }
        by_version.insert(version, Migration { version, name, sql });
    }

    Ok(by_version.into_values().collect())
}

/// Apply every migration whose version has not been recorded yet.
pub fn run_migrations(conn: &mut Connection, migrations_dir: &Path) -> Result<()> {
    ensure_migrations_table(conn)?;

    let applied = applied_migrations(conn)?;
    let migrations = load_migrations(migrations_dir)?;
    let mut newly_applied = 0;

    for migration in migrations {
        let checksum = migration.checksum();
        if let Some(recorded) = applied.get(&migration.version) {
            if !recorded.checksum.is_empty() && recorded.checksum != checksum {
                log::warn!(
                    "Migration {} changed after it was applied; the graph keeps the original version",
                    migration.name
                );
            }
            continue;
        }

        log::info!("Applying graph migration {}", migration.name);
        let tx = conn.transaction()?;
        tx.execute_batch(&migration.sql).map_err(|e| {
            GenesisError::Graph(format!("Failed to execute migration {}: {}", migration.name, e))
        })?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, checksum) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, checksum],
        )?;
        tx.commit()?;
        newly_applied += 1;
    }

    if newly_applied > 0 {
        log::info!("Applied {} graph migrations", newly_applied);
    } else {
        log::debug!("Graph schema is up to date");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_migrations(dir: &Path, files: &[(&str, &str)]) {
        fs::create_dir_all(dir).unwrap();
        for (name, sql) in files {
            fs::write(dir.join(name), sql).unwrap();
        }
    }

    #[test]
    fn test_load_orders_by_version_and_ignores_other_files() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("migrations");
        write_migrations(
            &dir,
            &[
                ("010_late.sql", "CREATE TABLE late (id INTEGER);"),
                ("002_early.sql", "CREATE TABLE early (id INTEGER);"),
                ("README.md", "not a migration"),
            ],
        );

        let migrations = load_migrations(&dir).unwrap();
        let names: Vec<_> = migrations.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["002_early", "010_late"]);
    }

    #[test]
    fn test_duplicate_or_unnumbered_migrations_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let dup = temp_dir.path().join("dup");
        write_migrations(&dup, &[("001_a.sql", "SELECT 1;"), ("001_b.sql", "SELECT 1;")]);
        assert!(matches!(load_migrations(&dup), Err(GenesisError::Config(_))));

        let bad = temp_dir.path().join("bad");
        write_migrations(&bad, &[("initial.sql", "SELECT 1;")]);
        assert!(load_migrations(&bad).is_err());
    }

    #[test]
    fn test_applied_versions_are_skipped_with_checksums_recorded() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("migrations");
        write_migrations(&dir, &[("001_things.sql", "CREATE TABLE things (id INTEGER);")]);
        let mut conn = Connection::open(temp_dir.path().join("graph.db")).unwrap();

        run_migrations(&mut conn, &dir).unwrap();
        // Edited after the fact: must not be re-run (CREATE TABLE would fail)
        write_migrations(&dir, &[("001_things.sql", "CREATE TABLE things (id INTEGER, x TEXT);")]);
        run_migrations(&mut conn, &dir).unwrap();

        let applied = applied_migrations(&conn).unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[&1].name, "001_things");
        assert_eq!(applied[&1].checksum.len(), 64);
    }

    #[test]
    fn test_graph_migrations_create_schema_and_are_repeatable() {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = Connection::open(temp_dir.path().join("graph.db")).unwrap();
        let migrations_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations");

        run_migrations(&mut conn, &migrations_dir).unwrap();
        run_migrations(&mut conn, &migrations_dir).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
            .unwrap();
        for expected in ["edges", "nodes", "schema_migrations", "vector_indexes"] {
            assert!(tables.contains(&expected.to_string()), "missing table {}", expected);
        }
        assert_eq!(applied_migrations(&conn).unwrap().len(), 2);
    }
}
