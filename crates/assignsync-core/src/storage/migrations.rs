//! Database schema migrations for assignsync.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);
    tracing::debug!(current_version, target_version = SCHEMA_VERSION, "checking schema");

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Returns 0 if no version is set (fresh database).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            tracing::warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: items, mappings, conflicts, history and kv.
///
/// The two unique indexes on `calendar_event_mappings` hold the
/// one-mapping-per-item and one-mapping-per-external-event invariants.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS assignments (
            id                TEXT PRIMARY KEY,
            title             TEXT NOT NULL,
            description       TEXT,
            course            TEXT,
            category          TEXT NOT NULL DEFAULT 'assignment',
            start_time        TEXT NOT NULL,
            end_time          TEXT,
            all_day           INTEGER NOT NULL DEFAULT 0,
            timezone          TEXT NOT NULL DEFAULT 'UTC',
            location          TEXT,
            reminders         TEXT NOT NULL DEFAULT '[]',
            recurrence        TEXT,
            color             TEXT,
            completed         INTEGER NOT NULL DEFAULT 0,
            external_event_id TEXT,
            sync_status       TEXT NOT NULL DEFAULT 'local',
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_assignments_start_time ON assignments(start_time);
        CREATE INDEX IF NOT EXISTS idx_assignments_sync_status ON assignments(sync_status);

        CREATE TABLE IF NOT EXISTS calendar_event_mappings (
            id                TEXT PRIMARY KEY,
            local_id          TEXT NOT NULL,
            external_id       TEXT NOT NULL,
            provider          TEXT NOT NULL,
            calendar_id       TEXT NOT NULL,
            last_synced_at    TEXT,
            sync_status       TEXT NOT NULL DEFAULT 'pending',
            local_updated_at  TEXT,
            remote_updated_at TEXT,
            remote_etag       TEXT,
            created_at        TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_mappings_local_id
            ON calendar_event_mappings(local_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_mappings_provider_external
            ON calendar_event_mappings(provider, external_id);

        CREATE TABLE IF NOT EXISTS sync_conflicts (
            id              TEXT PRIMARY KEY,
            local_id        TEXT,
            external_id     TEXT,
            provider        TEXT NOT NULL,
            conflict_type   TEXT NOT NULL,
            severity        TEXT NOT NULL,
            fields          TEXT NOT NULL DEFAULT '[]',
            local_snapshot  TEXT,
            remote_snapshot TEXT,
            status          TEXT NOT NULL DEFAULT 'pending',
            resolution      TEXT,
            detected_at     TEXT NOT NULL,
            resolved_at     TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_conflicts_status ON sync_conflicts(status);
        CREATE INDEX IF NOT EXISTS idx_conflicts_local_id ON sync_conflicts(local_id);

        CREATE TABLE IF NOT EXISTS sync_history (
            id           TEXT PRIMARY KEY,
            provider     TEXT NOT NULL,
            direction    TEXT NOT NULL,
            outcome      TEXT NOT NULL,
            started_at   TEXT NOT NULL,
            finished_at  TEXT NOT NULL,
            window_start TEXT NOT NULL,
            window_end   TEXT NOT NULL,
            report       TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_history_started_at ON sync_history(started_at);

        CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()?;
    Ok(())
}

/// Migration v2: remember whether a conflict was closed by policy.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "ALTER TABLE sync_conflicts ADD COLUMN auto_resolved INTEGER NOT NULL DEFAULT 0;",
    )?;

    set_schema_version(&tx, 2)?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn v2_column_exists() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('sync_conflicts') WHERE name = 'auto_resolved'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
