//! SQLite-based storage for assignments and sync bookkeeping.
//!
//! Provides persistent storage for:
//! - Local assignments (including deletion tombstones)
//! - Local item <-> external event mappings
//! - Sync conflicts and sync history
//! - Key-value store for engine state (last sync time, sync lock)

use std::path::Path;

use rusqlite::{params, Connection};

use super::data_dir;
use super::migrations;
use crate::error::{CoreError, DatabaseError};

/// SQLite database for the sync subsystem.
///
/// Query methods live next to their table: `assignments.rs`, `mappings.rs`,
/// `conflicts.rs`, `history.rs`.
pub struct SyncDb {
    pub(super) conn: Connection,
}

impl SyncDb {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open the database at `~/.config/assignsync/assignsync.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, CoreError> {
        let path = data_dir()?.join("assignsync.db");
        Self::open_at(&path)
    }

    /// Open (or create) the database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(DatabaseError::from)?;
        let db = Self { conn };
        db.migrate()?;
        tracing::debug!(path = %path.display(), "opened sync database");
        Ok(db)
    }

    /// Open an in-memory database (tests, dry runs).
    pub fn open_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory().map_err(DatabaseError::from)?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        migrations::migrate(&self.conn)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))
    }

    /// Get a value from the kv store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let mut stmt = self.conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let result = stmt.query_row(params![key], |row| row.get::<_, String>(0));
        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Set a value in the kv store.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Insert `key` only if it is absent. Returns whether the row was written.
    pub fn kv_insert_if_absent(&self, key: &str, value: &str) -> Result<bool, DatabaseError> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(changed == 1)
    }

    /// Replace `key` only while it still holds `expected`.
    pub fn kv_replace_if(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, DatabaseError> {
        let changed = self.conn.execute(
            "UPDATE kv SET value = ?3 WHERE key = ?1 AND value = ?2",
            params![key, expected, value],
        )?;
        Ok(changed == 1)
    }

    /// Remove `key` only while it still holds `expected`.
    pub fn kv_delete_if(&self, key: &str, expected: &str) -> Result<bool, DatabaseError> {
        let changed = self.conn.execute(
            "DELETE FROM kv WHERE key = ?1 AND value = ?2",
            params![key, expected],
        )?;
        Ok(changed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_store() {
        let db = SyncDb::open_memory().unwrap();
        assert!(db.kv_get("test").unwrap().is_none());
        db.kv_set("test", "hello").unwrap();
        assert_eq!(db.kv_get("test").unwrap().unwrap(), "hello");
        assert!(db.kv_delete_if("test", "hello").unwrap());
        assert!(db.kv_get("test").unwrap().is_none());
    }

    #[test]
    fn kv_insert_if_absent_only_writes_once() {
        let db = SyncDb::open_memory().unwrap();
        assert!(db.kv_insert_if_absent("lock", "a").unwrap());
        assert!(!db.kv_insert_if_absent("lock", "b").unwrap());
        assert_eq!(db.kv_get("lock").unwrap().as_deref(), Some("a"));
    }

    #[test]
    fn conditional_writes_check_current_value() {
        let db = SyncDb::open_memory().unwrap();
        db.kv_set("lock", "a").unwrap();

        assert!(db.kv_replace_if("lock", "a", "b").unwrap());
        assert!(!db.kv_replace_if("lock", "a", "c").unwrap());
        assert_eq!(db.kv_get("lock").unwrap().as_deref(), Some("b"));

        assert!(!db.kv_delete_if("lock", "a").unwrap());
        assert!(db.kv_delete_if("lock", "b").unwrap());
        assert!(db.kv_get("lock").unwrap().is_none());
    }

    #[test]
    fn open_at_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");
        {
            let db = SyncDb::open_at(&path).unwrap();
            db.kv_set("k", "v").unwrap();
        }
        let reopened = SyncDb::open_at(&path).unwrap();
        assert_eq!(reopened.kv_get("k").unwrap().as_deref(), Some("v"));
    }
}
