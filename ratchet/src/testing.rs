//! Testing utilities for migration development and verification.
//!
//! [`TestHarness`] pairs an in-memory database (shared with the store
//! under test) with an on-disk migration directory, plus query helpers and
//! schema assertions for writing migration tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::config::{Config, DbSpec};
use crate::engine::Migrator;
use crate::error::Error;
use crate::store::RESERVED_ID;

/// A captured database schema for comparison and snapshotting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Map of table name to its definition.
    pub tables: HashMap<String, TableSchema>,
}

/// One table's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// The SQL CREATE statement as stored by the database.
    pub sql: String,
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
    pub not_null: bool,
    pub primary_key: bool,
}

/// A test harness combining an in-memory database, a temporary migration
/// directory, and assertion helpers.
///
/// The database connection is shared with every [`Migrator`] the harness
/// hands out, so state persists across engine calls and can be inspected
/// between them. The harness assumes the default bookkeeping table name.
pub struct TestHarness {
    conn: Arc<Mutex<Connection>>,
    dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        let conn = Connection::open_in_memory().expect("failed to open in-memory test database");
        let dir = tempfile::tempdir().expect("failed to create temporary migration directory");
        Self {
            conn: Arc::new(Mutex::new(conn)),
            dir,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        self.conn
            .lock()
            .map_err(|_| Error::Generic("test connection mutex poisoned".into()))
    }

    /// Path of the temporary migration directory.
    pub fn dir_path(&self) -> &std::path::Path {
        self.dir.path()
    }

    /// The shared connection behind this harness.
    pub fn conn(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Write a file into the migration directory.
    pub fn write_migration(&self, filename: &str, content: &str) -> Result<(), Error> {
        std::fs::write(self.dir.path().join(filename), content)?;
        Ok(())
    }

    /// A configuration pointing at the harness database and directory.
    pub fn config(&self) -> Config {
        Config::new(DbSpec::Shared(Arc::clone(&self.conn)))
            .with_migration_dir(self.dir.path().to_string_lossy().into_owned())
    }

    /// A migrator over [`TestHarness::config`].
    pub fn migrator(&self) -> Migrator {
        Migrator::new(self.config())
    }

    /// Execute a SQL statement (for setting up test data).
    pub fn execute(&self, sql: &str) -> Result<usize, Error> {
        let guard = self.lock()?;
        Ok(guard.execute(sql, [])?)
    }

    /// Run a query expected to produce a single value.
    pub fn query_one<T: rusqlite::types::FromSql>(&self, sql: &str) -> Result<T, Error> {
        let guard = self.lock()?;
        Ok(guard.query_row(sql, [], |row| row.get(0))?)
    }

    /// Names of all user tables, sorted.
    pub fn table_names(&self) -> Result<Vec<String>, Error> {
        let guard = self.lock()?;
        let mut stmt = guard
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    pub fn assert_table_exists(&self, table: &str) -> Result<(), Error> {
        if self.table_names()?.contains(&table.to_string()) {
            Ok(())
        } else {
            Err(Error::Generic(format!("expected table {table:?} to exist")))
        }
    }

    /// Applied migration ids in ascending order. Empty when the
    /// bookkeeping table does not exist yet.
    pub fn completed_ids(&self) -> Result<Vec<i64>, Error> {
        if !self.table_names()?.contains(&"schema_migrations".to_string()) {
            return Ok(Vec::new());
        }
        let guard = self.lock()?;
        let mut stmt = guard
            .prepare("SELECT id FROM schema_migrations WHERE id != ?1 ORDER BY id")?;
        let ids = stmt
            .query_map([RESERVED_ID], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// Whether the reservation row is present.
    pub fn reservation_held(&self) -> Result<bool, Error> {
        if !self.table_names()?.contains(&"schema_migrations".to_string()) {
            return Ok(false);
        }
        let guard = self.lock()?;
        let mut stmt = guard.prepare("SELECT 1 FROM schema_migrations WHERE id = ?1")?;
        Ok(stmt.exists([RESERVED_ID])?)
    }

    /// Insert the reservation row, simulating another actor mid-run.
    /// Creates the bookkeeping table when missing.
    pub fn hold_reservation(&self) -> Result<(), Error> {
        let guard = self.lock()?;
        guard.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (id BIGINT UNIQUE NOT NULL, applied TIMESTAMP, description VARCHAR(1024))",
        )?;
        guard.execute(
            "INSERT INTO schema_migrations (id) VALUES (?1)",
            [RESERVED_ID],
        )?;
        Ok(())
    }

    /// Capture the current schema for later comparison.
    pub fn capture_schema(&self) -> Result<SchemaSnapshot, Error> {
        let guard = self.lock()?;
        let mut stmt = guard.prepare(
            "SELECT name, sql FROM sqlite_master WHERE type='table' AND sql IS NOT NULL",
        )?;
        let tables = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut snapshot = SchemaSnapshot {
            tables: HashMap::new(),
        };
        for (name, sql) in tables {
            let mut stmt = guard.prepare(&format!("PRAGMA table_info({name})"))?;
            let columns = stmt
                .query_map([], |row| {
                    Ok(ColumnInfo {
                        name: row.get(1)?,
                        type_name: row.get(2)?,
                        not_null: row.get::<_, i64>(3)? != 0,
                        primary_key: row.get::<_, i64>(5)? != 0,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            snapshot.tables.insert(name, TableSchema { sql, columns });
        }
        Ok(snapshot)
    }

    /// Assert the current schema equals an earlier snapshot.
    pub fn assert_schema_matches(&self, expected: &SchemaSnapshot) -> Result<(), Error> {
        let actual = self.capture_schema()?;
        if &actual == expected {
            Ok(())
        } else {
            Err(Error::Generic(format!(
                "schema mismatch: expected {expected:?}, got {actual:?}"
            )))
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harness_round_trips_data_and_schema() {
        let harness = TestHarness::new();
        harness
            .execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
            .unwrap();
        harness
            .execute("INSERT INTO users (name) VALUES ('alice')")
            .unwrap();
        harness.assert_table_exists("users").unwrap();
        let name: String = harness.query_one("SELECT name FROM users").unwrap();
        assert_eq!(name, "alice");

        let snapshot = harness.capture_schema().unwrap();
        let users = &snapshot.tables["users"];
        assert_eq!(users.columns.len(), 2);
        assert!(users.columns[0].primary_key);
        assert!(users.columns[1].not_null);
        harness.assert_schema_matches(&snapshot).unwrap();

        harness.execute("DROP TABLE users").unwrap();
        assert!(harness.assert_schema_matches(&snapshot).is_err());
    }

    #[test]
    fn reservation_helpers_track_the_reservation_row() {
        let harness = TestHarness::new();
        assert!(!harness.reservation_held().unwrap());
        harness.hold_reservation().unwrap();
        assert!(harness.reservation_held().unwrap());
        assert!(harness.completed_ids().unwrap().is_empty());
    }
}
