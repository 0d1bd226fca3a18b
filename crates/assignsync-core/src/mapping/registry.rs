//! Bidirectional key registry: local item id <-> external event id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::{NormalizedCalendarEvent, ProviderKind};
use crate::storage::SyncDb;
use crate::sync::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    Synced,
    #[default]
    Pending,
    Conflict,
    Error,
}

impl MappingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingStatus::Synced => "synced",
            MappingStatus::Pending => "pending",
            MappingStatus::Conflict => "conflict",
            MappingStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "synced" => Some(MappingStatus::Synced),
            "pending" => Some(MappingStatus::Pending),
            "conflict" => Some(MappingStatus::Conflict),
            "error" => Some(MappingStatus::Error),
            _ => None,
        }
    }
}

/// Link between one local item and one external event.
///
/// `local_updated_at` and `remote_updated_at` are the versions both sides had
/// at the last successful sync; a side whose current version differs has
/// changed since.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEventMapping {
    pub id: String,
    pub local_id: String,
    pub external_id: String,
    pub provider: ProviderKind,
    pub calendar_id: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub sync_status: MappingStatus,
    pub local_updated_at: Option<DateTime<Utc>>,
    pub remote_updated_at: Option<DateTime<Utc>>,
    pub remote_etag: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CalendarEventMapping {
    pub fn local_changed(&self, current: DateTime<Utc>) -> bool {
        self.local_updated_at != Some(current)
    }

    pub fn remote_changed(&self, event: &NormalizedCalendarEvent) -> bool {
        match (&self.remote_etag, &event.etag) {
            (Some(seen), Some(now)) => seen != now,
            _ => self.remote_updated_at != Some(event.updated_at),
        }
    }
}

/// Registry operations over the mapping table.
pub struct EventMappingService<'a> {
    db: &'a SyncDb,
}

impl<'a> EventMappingService<'a> {
    pub fn new(db: &'a SyncDb) -> Self {
        Self { db }
    }

    /// Link `local_id` to `remote`, recording both versions as synced.
    ///
    /// Linking a pair that is already linked returns the existing mapping.
    /// Linking either side to a different partner fails with
    /// [`SyncError::DuplicateMapping`].
    pub fn link(
        &self,
        local_id: &str,
        local_updated_at: DateTime<Utc>,
        remote: &NormalizedCalendarEvent,
    ) -> Result<CalendarEventMapping, SyncError> {
        if let Some(existing) = self.db.get_mapping_by_local(local_id)? {
            if existing.external_id == remote.id && existing.provider == remote.provider {
                return Ok(existing);
            }
            return Err(SyncError::DuplicateMapping(format!(
                "item {local_id} is already linked to {}:{}",
                existing.provider, existing.external_id
            )));
        }
        if let Some(existing) = self.db.get_mapping_by_external(remote.provider, &remote.id)? {
            return Err(SyncError::DuplicateMapping(format!(
                "event {}:{} is already linked to item {}",
                remote.provider, remote.id, existing.local_id
            )));
        }

        let now = Utc::now();
        let mapping = CalendarEventMapping {
            id: Uuid::new_v4().to_string(),
            local_id: local_id.to_string(),
            external_id: remote.id.clone(),
            provider: remote.provider,
            calendar_id: remote.calendar_id.clone(),
            last_synced_at: Some(now),
            sync_status: MappingStatus::Synced,
            local_updated_at: Some(local_updated_at),
            remote_updated_at: Some(remote.updated_at),
            remote_etag: remote.etag.clone(),
            created_at: now,
        };
        self.db.insert_mapping(&mapping).map_err(|e| match e {
            DatabaseError::Constraint(msg) => SyncError::DuplicateMapping(msg),
            other => other.into(),
        })?;
        tracing::debug!(local_id, external_id = %remote.id, "linked");
        Ok(mapping)
    }

    /// Point an existing mapping at a different external event (the old one
    /// was recreated or replaced).
    pub fn relink(
        &self,
        mapping: &mut CalendarEventMapping,
        local_updated_at: DateTime<Utc>,
        remote: &NormalizedCalendarEvent,
    ) -> Result<(), SyncError> {
        if let Some(other) = self.db.get_mapping_by_external(remote.provider, &remote.id)? {
            if other.id != mapping.id {
                return Err(SyncError::DuplicateMapping(format!(
                    "event {}:{} is already linked to item {}",
                    remote.provider, remote.id, other.local_id
                )));
            }
        }
        mapping.external_id = remote.id.clone();
        mapping.calendar_id = remote.calendar_id.clone();
        self.record_synced(mapping, local_updated_at, remote)
    }

    /// Drop the mapping for `local_id`. Returns whether one existed.
    pub fn unlink(&self, local_id: &str) -> Result<bool, SyncError> {
        match self.db.get_mapping_by_local(local_id)? {
            Some(mapping) => {
                self.db.delete_mapping(&mapping.id)?;
                tracing::debug!(local_id, external_id = %mapping.external_id, "unlinked");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn find_by_local(&self, local_id: &str) -> Result<Option<CalendarEventMapping>, SyncError> {
        Ok(self.db.get_mapping_by_local(local_id)?)
    }

    pub fn find_by_external(
        &self,
        provider: ProviderKind,
        external_id: &str,
    ) -> Result<Option<CalendarEventMapping>, SyncError> {
        Ok(self.db.get_mapping_by_external(provider, external_id)?)
    }

    pub fn list_for_provider(
        &self,
        provider: ProviderKind,
    ) -> Result<Vec<CalendarEventMapping>, SyncError> {
        Ok(self.db.list_mappings(provider)?)
    }

    /// Move both watermarks to the given versions and mark the mapping synced.
    pub fn record_synced(
        &self,
        mapping: &mut CalendarEventMapping,
        local_updated_at: DateTime<Utc>,
        remote: &NormalizedCalendarEvent,
    ) -> Result<(), SyncError> {
        mapping.local_updated_at = Some(local_updated_at);
        mapping.remote_updated_at = Some(remote.updated_at);
        mapping.remote_etag = remote.etag.clone();
        mapping.last_synced_at = Some(Utc::now());
        mapping.sync_status = MappingStatus::Synced;
        self.db.update_mapping(mapping)?;
        Ok(())
    }

    pub fn mark_status(
        &self,
        mapping: &mut CalendarEventMapping,
        status: MappingStatus,
    ) -> Result<(), SyncError> {
        if mapping.sync_status != status {
            mapping.sync_status = status;
            self.db.update_mapping(mapping)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventStatus;
    use chrono::Duration;

    fn event(id: &str) -> NormalizedCalendarEvent {
        let start = Utc::now();
        NormalizedCalendarEvent {
            id: id.to_string(),
            provider: ProviderKind::Memory,
            calendar_id: "primary".into(),
            title: "Essay".into(),
            description: None,
            location: None,
            start,
            end: start + Duration::hours(1),
            all_day: false,
            timezone: "UTC".into(),
            recurrence: None,
            reminders: Vec::new(),
            color: None,
            status: EventStatus::Confirmed,
            updated_at: start,
            etag: None,
            local_id: None,
        }
    }

    #[test]
    fn link_is_idempotent_for_the_same_pair() {
        let db = SyncDb::open_memory().unwrap();
        let svc = EventMappingService::new(&db);
        let now = Utc::now();

        let first = svc.link("a", now, &event("e1")).unwrap();
        let second = svc.link("a", now, &event("e1")).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(svc.list_for_provider(ProviderKind::Memory).unwrap().len(), 1);
    }

    #[test]
    fn second_partner_is_a_duplicate() {
        let db = SyncDb::open_memory().unwrap();
        let svc = EventMappingService::new(&db);
        let now = Utc::now();
        svc.link("a", now, &event("e1")).unwrap();

        assert!(matches!(
            svc.link("a", now, &event("e2")),
            Err(SyncError::DuplicateMapping(_))
        ));
        assert!(matches!(
            svc.link("b", now, &event("e1")),
            Err(SyncError::DuplicateMapping(_))
        ));
    }

    #[test]
    fn record_synced_moves_watermarks() {
        let db = SyncDb::open_memory().unwrap();
        let svc = EventMappingService::new(&db);
        let now = Utc::now();
        let mut mapping = svc.link("a", now, &event("e1")).unwrap();

        let mut remote = event("e1");
        remote.updated_at = now + Duration::minutes(5);
        assert!(mapping.remote_changed(&remote));

        let later = now + Duration::minutes(3);
        svc.record_synced(&mut mapping, later, &remote).unwrap();

        let stored = svc.find_by_local("a").unwrap().unwrap();
        assert_eq!(stored.local_updated_at, Some(later));
        assert!(!stored.remote_changed(&remote));
        assert!(!stored.local_changed(later));
    }

    #[test]
    fn etag_takes_precedence_over_timestamp() {
        let db = SyncDb::open_memory().unwrap();
        let svc = EventMappingService::new(&db);
        let mut remote = event("e1");
        remote.etag = Some("\"1\"".into());
        let mapping = svc.link("a", Utc::now(), &remote).unwrap();

        remote.updated_at += Duration::seconds(1);
        assert!(!mapping.remote_changed(&remote));
        remote.etag = Some("\"2\"".into());
        assert!(mapping.remote_changed(&remote));
    }

    #[test]
    fn relink_and_unlink() {
        let db = SyncDb::open_memory().unwrap();
        let svc = EventMappingService::new(&db);
        let now = Utc::now();
        let mut mapping = svc.link("a", now, &event("e1")).unwrap();

        svc.relink(&mut mapping, now, &event("e2")).unwrap();
        assert!(svc
            .find_by_external(ProviderKind::Memory, "e1")
            .unwrap()
            .is_none());
        assert_eq!(
            svc.find_by_external(ProviderKind::Memory, "e2")
                .unwrap()
                .unwrap()
                .local_id,
            "a"
        );

        assert!(svc.unlink("a").unwrap());
        assert!(!svc.unlink("a").unwrap());
    }
}
