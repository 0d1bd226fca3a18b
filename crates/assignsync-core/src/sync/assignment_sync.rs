//! Assignment-facing entry point: saves and deletes push straight to the
//! calendar when they can, and leave the rest to the next pass.

use chrono::Utc;

use crate::error::ValidationError;
use crate::mapping::timezone;
use crate::model::{Assignment, ItemSyncStatus};
use crate::provider::CalendarProvider;
use crate::storage::SyncDb;

use super::conflict::ConflictResolutionService;
use super::engine::CalendarSyncEngine;
use super::retry::RetryConfig;
use super::writer::SyncWriter;
use super::{SyncConfiguration, SyncError, SyncReport, SyncStatus};

pub struct AssignmentCalendarSyncService<'a> {
    db: &'a SyncDb,
    provider: &'a dyn CalendarProvider,
    config: SyncConfiguration,
    retry: RetryConfig,
}

impl<'a> AssignmentCalendarSyncService<'a> {
    pub fn new(
        db: &'a SyncDb,
        provider: &'a dyn CalendarProvider,
        config: SyncConfiguration,
    ) -> Self {
        let retry = RetryConfig {
            max_retries: config.retry_attempts,
            ..RetryConfig::default()
        };
        Self {
            db,
            provider,
            config,
            retry,
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn engine(&self) -> CalendarSyncEngine<'a> {
        CalendarSyncEngine::new(self.db, self.provider, self.config.clone())
            .with_retry_config(self.retry.clone())
    }

    pub fn conflicts(&self) -> ConflictResolutionService<'a> {
        ConflictResolutionService::new(self.db, self.provider, &self.config)
            .with_retry(self.retry.clone())
    }

    fn writer(&self) -> SyncWriter<'a> {
        SyncWriter::new(self.db, self.provider, &self.config, self.retry.clone())
    }

    fn validate(item: &Assignment) -> Result<(), ValidationError> {
        if item.title.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "title".into(),
                message: "must not be empty".into(),
            });
        }
        timezone::validate_timezone(&item.timezone)?;
        if let Some(end) = item.end_time {
            if end <= item.start_time {
                return Err(ValidationError::InvalidTimeRange {
                    start: item.start_time,
                    end,
                });
            }
        }
        if item.recurrence.as_ref().is_some_and(|r| r.interval == 0) {
            return Err(ValidationError::InvalidValue {
                field: "recurrence.interval".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Persist `item` and push it to the calendar when its category syncs and
    /// the direction allows export. A failed push is logged and left for the
    /// next pass; the saved item is returned either way.
    pub async fn save_assignment(&self, mut item: Assignment) -> Result<Assignment, SyncError> {
        Self::validate(&item)?;

        match self.db.get_assignment(&item.id)? {
            Some(prev) if prev.is_deleted() => {
                return Err(SyncError::AssignmentNotFound(item.id));
            }
            Some(prev) => {
                item.external_event_id = prev.external_event_id;
                item.sync_status = prev.sync_status;
                item.created_at = prev.created_at;
            }
            None => {
                item.external_event_id = None;
                item.sync_status = ItemSyncStatus::Local;
            }
        }
        item.touch();
        self.db.upsert_assignment(&item)?;
        tracing::info!(local_id = %item.id, title = %item.title, "assignment saved");

        let pushable = self.config.direction.allows_export()
            && self.config.includes(&item)
            && item.sync_status != ItemSyncStatus::Conflict;
        if !pushable {
            return Ok(item);
        }

        if let Err(e) = self.push(&mut item).await {
            let status = if item.external_event_id.is_some() {
                ItemSyncStatus::Error
            } else {
                ItemSyncStatus::Local
            };
            tracing::warn!(
                local_id = %item.id,
                error = %e,
                "immediate push failed, next sync will retry"
            );
            self.db.set_assignment_status(&item.id, status)?;
            item.sync_status = status;
        }
        Ok(item)
    }

    async fn push(&self, item: &mut Assignment) -> Result<(), SyncError> {
        let writer = self.writer();
        let Some(mapping) = writer.mappings().find_by_local(&item.id)? else {
            writer.export_new(item).await?;
            return Ok(());
        };
        match writer.fetch_remote(&mapping.external_id).await? {
            Some(remote) if !remote.is_cancelled() => {
                if mapping.remote_changed(&remote) {
                    // Both sides changed; the next pass compares them.
                    tracing::info!(local_id = %item.id, "calendar copy changed too, deferring");
                    return Ok(());
                }
                writer.export_to(item, &remote.id, Some(mapping)).await?;
            }
            _ => {
                tracing::info!(local_id = %item.id, "calendar copy deleted, deferring");
            }
        }
        Ok(())
    }

    /// Tombstone the item, then delete its event and mapping. When the
    /// provider call fails the tombstone stays for the next pass.
    pub async fn delete_assignment(&self, id: &str) -> Result<(), SyncError> {
        let mut item = self
            .db
            .get_assignment(id)?
            .filter(|i| !i.is_deleted())
            .ok_or_else(|| SyncError::AssignmentNotFound(id.to_string()))?;

        let writer = self.writer();
        let Some(mapping) = writer.mappings().find_by_local(id)? else {
            self.db.purge_assignment(id)?;
            tracing::info!(local_id = id, "assignment deleted");
            return Ok(());
        };

        item.sync_status = ItemSyncStatus::Deleted;
        item.touch();
        self.db.upsert_assignment(&item)?;

        if !self.config.direction.allows_export() {
            return Ok(());
        }
        match writer.remove_remote(&mapping.external_id, Some(id)).await {
            Ok(()) => tracing::info!(local_id = id, "assignment deleted"),
            Err(e) => tracing::warn!(
                local_id = id,
                error = %e,
                "calendar delete failed, tombstone kept for next sync"
            ),
        }
        Ok(())
    }

    /// Full pass over the configured window and direction.
    pub async fn sync_now(&self) -> Result<SyncReport, SyncError> {
        let window = self.config.window_at(Utc::now())?;
        self.engine().run(self.config.direction, window).await
    }

    /// Forget the link between `id` and its event. The event's local-id tag
    /// is cleared when the provider is reachable.
    pub async fn unlink(&self, id: &str) -> Result<Assignment, SyncError> {
        let mut item = self
            .db
            .get_assignment(id)?
            .filter(|i| !i.is_deleted())
            .ok_or_else(|| SyncError::AssignmentNotFound(id.to_string()))?;

        let writer = self.writer();
        if let Some(mapping) = writer.mappings().find_by_local(id)? {
            writer.mappings().unlink(id)?;
            if let Err(e) = writer.untag_remote(&mapping.external_id).await {
                tracing::warn!(local_id = id, error = %e, "could not clear event tag");
            }
        }
        item.external_event_id = None;
        item.sync_status = ItemSyncStatus::Local;
        self.db.upsert_assignment(&item)?;
        Ok(item)
    }

    pub fn status(&self) -> Result<SyncStatus, SyncError> {
        self.engine().status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssignmentCategory, ProviderKind};
    use crate::provider::MemoryProvider;
    use chrono::Duration;

    fn config() -> SyncConfiguration {
        SyncConfiguration {
            provider: ProviderKind::Memory,
            ..SyncConfiguration::default()
        }
    }

    fn essay() -> Assignment {
        let mut item = Assignment::new("Essay", Utc::now() + Duration::days(3));
        item.course = Some("CS101".into());
        item
    }

    #[tokio::test]
    async fn save_pushes_and_links() {
        let db = SyncDb::open_memory().unwrap();
        let cal = MemoryProvider::new();
        let svc = AssignmentCalendarSyncService::new(&db, &cal, config());

        let saved = svc.save_assignment(essay()).await.unwrap();
        assert_eq!(saved.sync_status, ItemSyncStatus::Synced);
        let event_id = saved.external_event_id.clone().unwrap();
        assert_eq!(cal.event(&event_id).unwrap().title, "CS101: Essay");

        let mut edited = saved.clone();
        edited.title = "Long essay".into();
        svc.save_assignment(edited).await.unwrap();
        assert_eq!(cal.event(&event_id).unwrap().title, "CS101: Long essay");
        assert_eq!(cal.live_events().len(), 1);
    }

    #[tokio::test]
    async fn save_keeps_item_when_provider_fails() {
        let db = SyncDb::open_memory().unwrap();
        let cal = MemoryProvider::new();
        let svc = AssignmentCalendarSyncService::new(&db, &cal, config())
            .with_retry_config(RetryConfig::immediate(0));

        cal.fail_next_calls(1);
        let saved = svc.save_assignment(essay()).await.unwrap();
        assert_eq!(saved.sync_status, ItemSyncStatus::Local);
        assert!(cal.live_events().is_empty());
        assert!(db.get_assignment(&saved.id).unwrap().is_some());

        let report = svc.sync_now().await.unwrap();
        assert_eq!(report.created_remote, 1);
    }

    #[tokio::test]
    async fn excluded_category_is_not_pushed() {
        let db = SyncDb::open_memory().unwrap();
        let cal = MemoryProvider::new();
        let svc = AssignmentCalendarSyncService::new(&db, &cal, config());

        let mut item = essay();
        item.category = AssignmentCategory::Lecture;
        let saved = svc.save_assignment(item).await.unwrap();
        assert_eq!(saved.sync_status, ItemSyncStatus::Local);
        assert_eq!(cal.writes(), 0);
    }

    #[tokio::test]
    async fn save_rejects_invalid_items() {
        let db = SyncDb::open_memory().unwrap();
        let cal = MemoryProvider::new();
        let svc = AssignmentCalendarSyncService::new(&db, &cal, config());

        let mut item = essay();
        item.timezone = "Mars/Olympus".into();
        assert!(matches!(
            svc.save_assignment(item).await,
            Err(SyncError::Validation(ValidationError::UnknownTimezone(_)))
        ));

        let mut item = essay();
        item.end_time = Some(item.start_time - Duration::hours(1));
        assert!(svc.save_assignment(item).await.is_err());

        let mut item = essay();
        item.title = "   ".into();
        assert!(svc.save_assignment(item).await.is_err());
    }

    #[tokio::test]
    async fn delete_removes_event_and_mapping() {
        let db = SyncDb::open_memory().unwrap();
        let cal = MemoryProvider::new();
        let svc = AssignmentCalendarSyncService::new(&db, &cal, config());

        let saved = svc.save_assignment(essay()).await.unwrap();
        svc.delete_assignment(&saved.id).await.unwrap();
        assert!(db.get_assignment(&saved.id).unwrap().is_none());
        assert!(cal.live_events().is_empty());
        assert_eq!(svc.status().unwrap().mapped_items, 0);
    }

    #[tokio::test]
    async fn failed_delete_leaves_tombstone_for_next_pass() {
        let db = SyncDb::open_memory().unwrap();
        let cal = MemoryProvider::new();
        let svc = AssignmentCalendarSyncService::new(&db, &cal, config())
            .with_retry_config(RetryConfig::immediate(0));

        let saved = svc.save_assignment(essay()).await.unwrap();
        cal.fail_next_calls(1);
        svc.delete_assignment(&saved.id).await.unwrap();
        let tombstone = db.get_assignment(&saved.id).unwrap().unwrap();
        assert!(tombstone.is_deleted());
        assert_eq!(cal.live_events().len(), 1);

        let report = svc.sync_now().await.unwrap();
        assert_eq!(report.deleted_remote, 1);
        assert!(db.get_assignment(&saved.id).unwrap().is_none());
        assert!(cal.live_events().is_empty());
    }

    #[tokio::test]
    async fn unlink_clears_mapping_and_tag() {
        let db = SyncDb::open_memory().unwrap();
        let cal = MemoryProvider::new();
        let svc = AssignmentCalendarSyncService::new(&db, &cal, config());

        let saved = svc.save_assignment(essay()).await.unwrap();
        let event_id = saved.external_event_id.clone().unwrap();
        let item = svc.unlink(&saved.id).await.unwrap();
        assert_eq!(item.sync_status, ItemSyncStatus::Local);
        assert!(item.external_event_id.is_none());
        assert!(cal.event(&event_id).unwrap().local_id.is_none());
        assert_eq!(svc.status().unwrap().mapped_items, 0);
    }
}
