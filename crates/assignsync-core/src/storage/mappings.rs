//! Mapping table queries.
//!
//! `idx_mappings_local_id` and `idx_mappings_provider_external` reject a
//! second mapping for either side; those failures come back as
//! [`DatabaseError::Constraint`].

use rusqlite::{params, OptionalExtension, Row};

use super::database::SyncDb;
use super::{format_ts, parse_opt_ts, parse_ts};
use crate::error::DatabaseError;
use crate::mapping::{CalendarEventMapping, MappingStatus};
use crate::model::ProviderKind;

const TABLE: &str = "calendar_event_mappings";

const COLUMNS: &str = "id, local_id, external_id, provider, calendar_id, last_synced_at,
     sync_status, local_updated_at, remote_updated_at, remote_etag, created_at";

struct RawMapping {
    id: String,
    local_id: String,
    external_id: String,
    provider: String,
    calendar_id: String,
    last_synced_at: Option<String>,
    sync_status: String,
    local_updated_at: Option<String>,
    remote_updated_at: Option<String>,
    remote_etag: Option<String>,
    created_at: String,
}

fn read_row(row: &Row) -> Result<RawMapping, rusqlite::Error> {
    Ok(RawMapping {
        id: row.get(0)?,
        local_id: row.get(1)?,
        external_id: row.get(2)?,
        provider: row.get(3)?,
        calendar_id: row.get(4)?,
        last_synced_at: row.get(5)?,
        sync_status: row.get(6)?,
        local_updated_at: row.get(7)?,
        remote_updated_at: row.get(8)?,
        remote_etag: row.get(9)?,
        created_at: row.get(10)?,
    })
}

impl RawMapping {
    fn decode(self) -> Result<CalendarEventMapping, DatabaseError> {
        let corrupt = |message: String| DatabaseError::CorruptRow {
            table: TABLE,
            message,
        };
        Ok(CalendarEventMapping {
            provider: ProviderKind::parse(&self.provider)
                .ok_or_else(|| corrupt(format!("unknown provider '{}'", self.provider)))?,
            sync_status: MappingStatus::parse(&self.sync_status)
                .ok_or_else(|| corrupt(format!("unknown sync_status '{}'", self.sync_status)))?,
            last_synced_at: parse_opt_ts(TABLE, self.last_synced_at)?,
            local_updated_at: parse_opt_ts(TABLE, self.local_updated_at)?,
            remote_updated_at: parse_opt_ts(TABLE, self.remote_updated_at)?,
            created_at: parse_ts(TABLE, &self.created_at)?,
            id: self.id,
            local_id: self.local_id,
            external_id: self.external_id,
            calendar_id: self.calendar_id,
            remote_etag: self.remote_etag,
        })
    }
}

impl SyncDb {
    pub fn insert_mapping(&self, m: &CalendarEventMapping) -> Result<(), DatabaseError> {
        self.conn.execute(
            &format!(
                "INSERT INTO calendar_event_mappings ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                m.id,
                m.local_id,
                m.external_id,
                m.provider.as_str(),
                m.calendar_id,
                m.last_synced_at.as_ref().map(format_ts),
                m.sync_status.as_str(),
                m.local_updated_at.as_ref().map(format_ts),
                m.remote_updated_at.as_ref().map(format_ts),
                m.remote_etag,
                format_ts(&m.created_at),
            ],
        )?;
        Ok(())
    }

    /// Rewrite every mutable column of an existing mapping.
    pub fn update_mapping(&self, m: &CalendarEventMapping) -> Result<(), DatabaseError> {
        self.conn.execute(
            "UPDATE calendar_event_mappings
             SET external_id = ?2, calendar_id = ?3, last_synced_at = ?4, sync_status = ?5,
                 local_updated_at = ?6, remote_updated_at = ?7, remote_etag = ?8
             WHERE id = ?1",
            params![
                m.id,
                m.external_id,
                m.calendar_id,
                m.last_synced_at.as_ref().map(format_ts),
                m.sync_status.as_str(),
                m.local_updated_at.as_ref().map(format_ts),
                m.remote_updated_at.as_ref().map(format_ts),
                m.remote_etag,
            ],
        )?;
        Ok(())
    }

    pub fn delete_mapping(&self, id: &str) -> Result<bool, DatabaseError> {
        let n = self
            .conn
            .execute("DELETE FROM calendar_event_mappings WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    pub fn get_mapping_by_local(
        &self,
        local_id: &str,
    ) -> Result<Option<CalendarEventMapping>, DatabaseError> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM calendar_event_mappings WHERE local_id = ?1"),
                params![local_id],
                read_row,
            )
            .optional()?;
        raw.map(RawMapping::decode).transpose()
    }

    pub fn get_mapping_by_external(
        &self,
        provider: ProviderKind,
        external_id: &str,
    ) -> Result<Option<CalendarEventMapping>, DatabaseError> {
        let raw = self
            .conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM calendar_event_mappings
                     WHERE provider = ?1 AND external_id = ?2"
                ),
                params![provider.as_str(), external_id],
                read_row,
            )
            .optional()?;
        raw.map(RawMapping::decode).transpose()
    }

    pub fn list_mappings(
        &self,
        provider: ProviderKind,
    ) -> Result<Vec<CalendarEventMapping>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {COLUMNS} FROM calendar_event_mappings WHERE provider = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![provider.as_str()], read_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.decode()?);
        }
        Ok(out)
    }

    pub fn count_mappings(&self, provider: ProviderKind) -> Result<usize, DatabaseError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM calendar_event_mappings WHERE provider = ?1",
            params![provider.as_str()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}
