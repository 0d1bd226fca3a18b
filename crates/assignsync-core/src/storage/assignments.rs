//! Assignment table queries.

use rusqlite::{params, OptionalExtension, Row};

use super::database::SyncDb;
use super::{format_ts, parse_opt_ts, parse_ts};
use crate::error::DatabaseError;
use crate::model::{Assignment, AssignmentCategory, EventColor, ItemSyncStatus};

const TABLE: &str = "assignments";

const COLUMNS: &str = "id, title, description, course, category, start_time, end_time, all_day,
     timezone, location, reminders, recurrence, color, completed, external_event_id,
     sync_status, created_at, updated_at";

fn corrupt(message: String) -> DatabaseError {
    DatabaseError::CorruptRow {
        table: TABLE,
        message,
    }
}

fn color_to_db(color: Option<EventColor>) -> Result<Option<String>, DatabaseError> {
    color
        .map(|c| serde_json::to_value(c).map(|v| v.as_str().unwrap_or_default().to_string()))
        .transpose()
        .map_err(|e| corrupt(e.to_string()))
}

fn color_from_db(raw: Option<String>) -> Result<Option<EventColor>, DatabaseError> {
    raw.map(|s| serde_json::from_value(serde_json::Value::String(s)))
        .transpose()
        .map_err(|e| corrupt(format!("bad color: {e}")))
}

/// Raw column values; decoded outside the rusqlite closure so decode
/// failures surface as `CorruptRow` instead of a generic query error.
struct RawAssignment {
    id: String,
    title: String,
    description: Option<String>,
    course: Option<String>,
    category: String,
    start_time: String,
    end_time: Option<String>,
    all_day: bool,
    timezone: String,
    location: Option<String>,
    reminders: String,
    recurrence: Option<String>,
    color: Option<String>,
    completed: bool,
    external_event_id: Option<String>,
    sync_status: String,
    created_at: String,
    updated_at: String,
}

fn read_row(row: &Row) -> Result<RawAssignment, rusqlite::Error> {
    Ok(RawAssignment {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        course: row.get(3)?,
        category: row.get(4)?,
        start_time: row.get(5)?,
        end_time: row.get(6)?,
        all_day: row.get(7)?,
        timezone: row.get(8)?,
        location: row.get(9)?,
        reminders: row.get(10)?,
        recurrence: row.get(11)?,
        color: row.get(12)?,
        completed: row.get(13)?,
        external_event_id: row.get(14)?,
        sync_status: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

impl RawAssignment {
    fn decode(self) -> Result<Assignment, DatabaseError> {
        Ok(Assignment {
            category: AssignmentCategory::parse(&self.category)
                .ok_or_else(|| corrupt(format!("unknown category '{}'", self.category)))?,
            start_time: parse_ts(TABLE, &self.start_time)?,
            end_time: parse_opt_ts(TABLE, self.end_time)?,
            reminders: serde_json::from_str(&self.reminders)
                .map_err(|e| corrupt(format!("bad reminders: {e}")))?,
            recurrence: self
                .recurrence
                .map(|r| serde_json::from_str(&r))
                .transpose()
                .map_err(|e| corrupt(format!("bad recurrence: {e}")))?,
            color: color_from_db(self.color)?,
            sync_status: ItemSyncStatus::parse(&self.sync_status)
                .ok_or_else(|| corrupt(format!("unknown sync_status '{}'", self.sync_status)))?,
            created_at: parse_ts(TABLE, &self.created_at)?,
            updated_at: parse_ts(TABLE, &self.updated_at)?,
            id: self.id,
            title: self.title,
            description: self.description,
            course: self.course,
            all_day: self.all_day,
            timezone: self.timezone,
            location: self.location,
            completed: self.completed,
            external_event_id: self.external_event_id,
        })
    }
}

impl SyncDb {
    /// Insert or replace an assignment.
    pub fn upsert_assignment(&self, item: &Assignment) -> Result<(), DatabaseError> {
        let reminders =
            serde_json::to_string(&item.reminders).map_err(|e| corrupt(e.to_string()))?;
        let recurrence = item
            .recurrence
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?;

        self.conn.execute(
            &format!("INSERT OR REPLACE INTO assignments ({COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"),
            params![
                item.id,
                item.title,
                item.description,
                item.course,
                item.category.as_str(),
                format_ts(&item.start_time),
                item.end_time.as_ref().map(format_ts),
                item.all_day,
                item.timezone,
                item.location,
                reminders,
                recurrence,
                color_to_db(item.color)?,
                item.completed,
                item.external_event_id,
                item.sync_status.as_str(),
                format_ts(&item.created_at),
                format_ts(&item.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_assignment(&self, id: &str) -> Result<Option<Assignment>, DatabaseError> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM assignments WHERE id = ?1"),
                params![id],
                read_row,
            )
            .optional()?;
        raw.map(RawAssignment::decode).transpose()
    }

    /// All live (non-tombstoned) assignments ordered by start time.
    pub fn list_assignments(&self) -> Result<Vec<Assignment>, DatabaseError> {
        self.query_assignments(
            &format!(
                "SELECT {COLUMNS} FROM assignments WHERE sync_status != 'deleted' ORDER BY start_time"
            ),
            [],
        )
    }

    /// Tombstoned assignments waiting for their deletion to be propagated.
    pub fn list_deleted_assignments(&self) -> Result<Vec<Assignment>, DatabaseError> {
        self.query_assignments(
            &format!("SELECT {COLUMNS} FROM assignments WHERE sync_status = 'deleted'"),
            [],
        )
    }

    pub fn set_assignment_status(
        &self,
        id: &str,
        status: ItemSyncStatus,
    ) -> Result<(), DatabaseError> {
        self.conn.execute(
            "UPDATE assignments SET sync_status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        Ok(())
    }

    /// Hard delete. Returns whether a row existed.
    pub fn purge_assignment(&self, id: &str) -> Result<bool, DatabaseError> {
        let n = self
            .conn
            .execute("DELETE FROM assignments WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    fn query_assignments<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<Assignment>, DatabaseError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, read_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.decode()?);
        }
        Ok(out)
    }
}
