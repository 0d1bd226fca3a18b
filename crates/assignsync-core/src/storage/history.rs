//! Sync history queries. Each row holds the full report as JSON.

use rusqlite::params;

use super::database::SyncDb;
use super::format_ts;
use crate::error::DatabaseError;
use crate::sync::SyncReport;

const TABLE: &str = "sync_history";

impl SyncDb {
    pub fn insert_history(&self, report: &SyncReport) -> Result<(), DatabaseError> {
        let json = serde_json::to_string(report).map_err(|e| DatabaseError::CorruptRow {
            table: TABLE,
            message: e.to_string(),
        })?;
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_history
             (id, provider, direction, outcome, started_at, finished_at, window_start, window_end, report)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                report.id,
                report.provider.as_str(),
                report.direction.as_str(),
                report.outcome.as_str(),
                format_ts(&report.started_at),
                format_ts(&report.finished_at),
                format_ts(&report.window.start),
                format_ts(&report.window.end),
                json,
            ],
        )?;
        Ok(())
    }

    /// Most recent passes first.
    pub fn list_history(&self, limit: usize) -> Result<Vec<SyncReport>, DatabaseError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self
            .conn
            .prepare("SELECT report FROM sync_history ORDER BY started_at DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for row in rows {
            let raw = row?;
            let report = serde_json::from_str(&raw).map_err(|e| DatabaseError::CorruptRow {
                table: TABLE,
                message: e.to_string(),
            })?;
            out.push(report);
        }
        Ok(out)
    }

    pub fn last_history(&self) -> Result<Option<SyncReport>, DatabaseError> {
        Ok(self.list_history(1)?.into_iter().next())
    }
}
