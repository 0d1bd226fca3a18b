//! Paired writes: every change to one store is followed by the mapping
//! update that records it, so an interrupted pass can be re-run.

use crate::mapping::{AssignmentEventMapper, CalendarEventMapping, EventMappingService};
use crate::model::{Assignment, AssignmentCategory, ItemSyncStatus, NormalizedCalendarEvent};
use crate::provider::CalendarProvider;
use crate::storage::SyncDb;

use super::retry::{with_retry, RetryConfig};
use super::{SyncConfiguration, SyncError};

pub(crate) struct SyncWriter<'a> {
    pub(crate) db: &'a SyncDb,
    pub(crate) provider: &'a dyn CalendarProvider,
    pub(crate) mapper: AssignmentEventMapper,
    pub(crate) retry: RetryConfig,
}

impl<'a> SyncWriter<'a> {
    pub(crate) fn new(
        db: &'a SyncDb,
        provider: &'a dyn CalendarProvider,
        config: &SyncConfiguration,
        retry: RetryConfig,
    ) -> Self {
        let mut mapper = AssignmentEventMapper::from_config(config);
        mapper.provider = provider.kind();
        Self {
            db,
            provider,
            mapper,
            retry,
        }
    }

    pub(crate) fn mappings(&self) -> EventMappingService<'a> {
        EventMappingService::new(self.db)
    }

    pub(crate) fn calendar_id(&self) -> &str {
        &self.mapper.calendar_id
    }

    pub(crate) async fn fetch_remote(
        &self,
        id: &str,
    ) -> Result<Option<NormalizedCalendarEvent>, SyncError> {
        with_retry(&self.retry, || self.provider.get_event(self.calendar_id(), id)).await
    }

    /// Point `mapping` (or a new mapping) at `remote` with both versions synced.
    fn bind(
        &self,
        mapping: Option<CalendarEventMapping>,
        item: &Assignment,
        remote: &NormalizedCalendarEvent,
    ) -> Result<CalendarEventMapping, SyncError> {
        let mappings = self.mappings();
        match mapping {
            Some(mut m) => {
                mappings.relink(&mut m, item.updated_at, remote)?;
                Ok(m)
            }
            None => mappings.link(&item.id, item.updated_at, remote),
        }
    }

    fn mark_synced(&self, item: &mut Assignment, remote: &NormalizedCalendarEvent) -> Result<(), SyncError> {
        item.external_event_id = Some(remote.id.clone());
        item.sync_status = ItemSyncStatus::Synced;
        self.db.upsert_assignment(item)?;
        Ok(())
    }

    /// Create a new event for `item` and link it.
    pub(crate) async fn export_new(
        &self,
        item: &mut Assignment,
    ) -> Result<NormalizedCalendarEvent, SyncError> {
        let mut event = self.mapper.to_event(item)?;
        event.id.clear();
        let created = with_retry(&self.retry, || {
            self.provider.create_event(self.calendar_id(), &event)
        })
        .await?;
        // A crash here leaves a tagged orphan that the next pass relinks.
        self.mark_synced(item, &created)?;
        self.mappings().link(&item.id, item.updated_at, &created)?;
        tracing::info!(local_id = %item.id, external_id = %created.id, "exported");
        Ok(created)
    }

    /// Overwrite event `event_id` with `item`.
    pub(crate) async fn export_to(
        &self,
        item: &mut Assignment,
        event_id: &str,
        mapping: Option<CalendarEventMapping>,
    ) -> Result<NormalizedCalendarEvent, SyncError> {
        let mut event = self.mapper.to_event(item)?;
        event.id = event_id.to_string();
        let updated = with_retry(&self.retry, || {
            self.provider.update_event(self.calendar_id(), &event)
        })
        .await?;
        self.mark_synced(item, &updated)?;
        self.bind(mapping, item, &updated)?;
        tracing::info!(local_id = %item.id, external_id = %updated.id, "pushed local changes");
        Ok(updated)
    }

    /// Create a fresh event for an item whose event was deleted.
    pub(crate) async fn recreate_remote(
        &self,
        item: &mut Assignment,
        mapping: Option<CalendarEventMapping>,
    ) -> Result<NormalizedCalendarEvent, SyncError> {
        let mut event = self.mapper.to_event(item)?;
        event.id.clear();
        let created = with_retry(&self.retry, || {
            self.provider.create_event(self.calendar_id(), &event)
        })
        .await?;
        self.mark_synced(item, &created)?;
        self.bind(mapping, item, &created)?;
        tracing::info!(local_id = %item.id, external_id = %created.id, "recreated event");
        Ok(created)
    }

    /// New local item from `event`, linked.
    pub(crate) fn import_new(
        &self,
        event: &NormalizedCalendarEvent,
        category: AssignmentCategory,
    ) -> Result<Assignment, SyncError> {
        let item = self.mapper.to_assignment(event, category);
        self.db.upsert_assignment(&item)?;
        self.mappings().link(&item.id, item.updated_at, event)?;
        tracing::info!(local_id = %item.id, external_id = %event.id, "imported");
        Ok(item)
    }

    /// Apply `event` onto `item` and record both versions.
    pub(crate) fn import_into(
        &self,
        item: &mut Assignment,
        event: &NormalizedCalendarEvent,
        mapping: Option<CalendarEventMapping>,
    ) -> Result<(), SyncError> {
        self.mapper.apply_event(item, event);
        self.mark_synced(item, event)?;
        self.bind(mapping, item, event)?;
        tracing::info!(local_id = %item.id, external_id = %event.id, "pulled remote changes");
        Ok(())
    }

    /// Link `item` to an event that already matches it.
    pub(crate) fn adopt(
        &self,
        item: &mut Assignment,
        event: &NormalizedCalendarEvent,
    ) -> Result<(), SyncError> {
        self.mark_synced(item, event)?;
        self.mappings().link(&item.id, item.updated_at, event)?;
        tracing::info!(local_id = %item.id, external_id = %event.id, "relinked");
        Ok(())
    }

    /// Delete the event, then the mapping and any local tombstone.
    pub(crate) async fn remove_remote(
        &self,
        event_id: &str,
        local_id: Option<&str>,
    ) -> Result<(), SyncError> {
        with_retry(&self.retry, || {
            self.provider.delete_event(self.calendar_id(), event_id)
        })
        .await?;
        if let Some(local_id) = local_id {
            self.mappings().unlink(local_id)?;
            self.db.purge_assignment(local_id)?;
        }
        tracing::info!(external_id = event_id, "deleted remote event");
        Ok(())
    }

    /// Drop the local item and its mapping.
    pub(crate) fn remove_local(&self, local_id: &str) -> Result<(), SyncError> {
        self.mappings().unlink(local_id)?;
        self.db.purge_assignment(local_id)?;
        tracing::info!(local_id, "deleted local item");
        Ok(())
    }

    /// Clear the local-id tag on `event_id` so it no longer claims an item.
    pub(crate) async fn untag_remote(&self, event_id: &str) -> Result<(), SyncError> {
        let Some(mut event) = self.fetch_remote(event_id).await? else {
            return Ok(());
        };
        if event.is_cancelled() || event.local_id.is_none() {
            return Ok(());
        }
        event.local_id = None;
        with_retry(&self.retry, || {
            self.provider.update_event(self.calendar_id(), &event)
        })
        .await?;
        tracing::info!(external_id = event_id, "cleared local id tag");
        Ok(())
    }
}
