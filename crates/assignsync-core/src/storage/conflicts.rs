//! Conflict table queries.

use rusqlite::{params, OptionalExtension, Row};

use super::database::SyncDb;
use super::{format_ts, parse_opt_ts, parse_ts};
use crate::error::DatabaseError;
use crate::model::ProviderKind;
use crate::sync::{ConflictSeverity, ConflictType, ResolutionChoice, ResolutionStatus, SyncConflict};

const TABLE: &str = "sync_conflicts";

const COLUMNS: &str = "id, local_id, external_id, provider, conflict_type, severity, fields,
     local_snapshot, remote_snapshot, status, resolution, auto_resolved, detected_at, resolved_at";

fn corrupt(message: String) -> DatabaseError {
    DatabaseError::CorruptRow {
        table: TABLE,
        message,
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| corrupt(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(what: &str, raw: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| corrupt(format!("bad {what}: {e}")))
}

fn resolution_to_db(choice: Option<ResolutionChoice>) -> Option<&'static str> {
    choice.map(|c| match c {
        ResolutionChoice::UseLocal => "use_local",
        ResolutionChoice::UseRemote => "use_remote",
        ResolutionChoice::Merge => "merge",
    })
}

struct RawConflict {
    id: String,
    local_id: Option<String>,
    external_id: Option<String>,
    provider: String,
    conflict_type: String,
    severity: String,
    fields: String,
    local_snapshot: Option<String>,
    remote_snapshot: Option<String>,
    status: String,
    resolution: Option<String>,
    auto_resolved: bool,
    detected_at: String,
    resolved_at: Option<String>,
}

fn read_row(row: &Row) -> Result<RawConflict, rusqlite::Error> {
    Ok(RawConflict {
        id: row.get(0)?,
        local_id: row.get(1)?,
        external_id: row.get(2)?,
        provider: row.get(3)?,
        conflict_type: row.get(4)?,
        severity: row.get(5)?,
        fields: row.get(6)?,
        local_snapshot: row.get(7)?,
        remote_snapshot: row.get(8)?,
        status: row.get(9)?,
        resolution: row.get(10)?,
        auto_resolved: row.get(11)?,
        detected_at: row.get(12)?,
        resolved_at: row.get(13)?,
    })
}

impl RawConflict {
    fn decode(self) -> Result<SyncConflict, DatabaseError> {
        Ok(SyncConflict {
            provider: ProviderKind::parse(&self.provider)
                .ok_or_else(|| corrupt(format!("unknown provider '{}'", self.provider)))?,
            conflict_type: ConflictType::parse(&self.conflict_type)
                .ok_or_else(|| corrupt(format!("unknown conflict_type '{}'", self.conflict_type)))?,
            severity: ConflictSeverity::parse(&self.severity)
                .ok_or_else(|| corrupt(format!("unknown severity '{}'", self.severity)))?,
            fields: from_json("fields", &self.fields)?,
            local_snapshot: self
                .local_snapshot
                .as_deref()
                .map(|raw| from_json("local_snapshot", raw))
                .transpose()?,
            remote_snapshot: self
                .remote_snapshot
                .as_deref()
                .map(|raw| from_json("remote_snapshot", raw))
                .transpose()?,
            status: ResolutionStatus::parse(&self.status)
                .ok_or_else(|| corrupt(format!("unknown status '{}'", self.status)))?,
            resolution: self
                .resolution
                .as_deref()
                .map(|r| {
                    ResolutionChoice::parse(r)
                        .ok_or_else(|| corrupt(format!("unknown resolution '{r}'")))
                })
                .transpose()?,
            detected_at: parse_ts(TABLE, &self.detected_at)?,
            resolved_at: parse_opt_ts(TABLE, self.resolved_at)?,
            auto_resolved: self.auto_resolved,
            id: self.id,
            local_id: self.local_id,
            external_id: self.external_id,
        })
    }
}

impl SyncDb {
    /// Insert or replace a conflict record.
    pub fn upsert_conflict(&self, c: &SyncConflict) -> Result<(), DatabaseError> {
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO sync_conflicts ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                c.id,
                c.local_id,
                c.external_id,
                c.provider.as_str(),
                c.conflict_type.as_str(),
                c.severity.as_str(),
                to_json(&c.fields)?,
                c.local_snapshot.as_ref().map(to_json).transpose()?,
                c.remote_snapshot.as_ref().map(to_json).transpose()?,
                c.status.as_str(),
                resolution_to_db(c.resolution),
                c.auto_resolved,
                format_ts(&c.detected_at),
                c.resolved_at.as_ref().map(format_ts),
            ],
        )?;
        Ok(())
    }

    pub fn get_conflict(&self, id: &str) -> Result<Option<SyncConflict>, DatabaseError> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM sync_conflicts WHERE id = ?1"),
                params![id],
                read_row,
            )
            .optional()?;
        raw.map(RawConflict::decode).transpose()
    }

    /// Conflicts with the given status (all when `None`), newest first.
    pub fn list_conflicts(
        &self,
        status: Option<ResolutionStatus>,
    ) -> Result<Vec<SyncConflict>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM sync_conflicts
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY detected_at DESC"
        ))?;
        let rows = stmt.query_map(params![status.map(|s| s.as_str())], read_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.decode()?);
        }
        Ok(out)
    }

    /// The pending conflict for a `(local_id, external_id)` pair, if any.
    /// `NULL` sides match `NULL`.
    pub fn find_pending_conflict(
        &self,
        local_id: Option<&str>,
        external_id: Option<&str>,
    ) -> Result<Option<SyncConflict>, DatabaseError> {
        self.find_conflict(local_id, external_id, ResolutionStatus::Pending)
    }

    /// Most recent conflict for a pair with the given status.
    pub fn find_conflict(
        &self,
        local_id: Option<&str>,
        external_id: Option<&str>,
        status: ResolutionStatus,
    ) -> Result<Option<SyncConflict>, DatabaseError> {
        let raw = self
            .conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM sync_conflicts
                     WHERE status = ?3 AND local_id IS ?1 AND external_id IS ?2
                     ORDER BY detected_at DESC
                     LIMIT 1"
                ),
                params![local_id, external_id, status.as_str()],
                read_row,
            )
            .optional()?;
        raw.map(RawConflict::decode).transpose()
    }

    pub fn count_pending_conflicts(&self) -> Result<usize, DatabaseError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_conflicts WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}
