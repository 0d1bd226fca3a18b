//! Conflict detection, classification and resolution.

use chrono::{DateTime, Datelike, Utc};
use serde_json::json;

use crate::mapping::{collapse_whitespace, fields, recurrence, timezone, CalendarEventMapping};
use crate::model::{Assignment, ItemSyncStatus, NormalizedCalendarEvent, Reminder};
use crate::provider::CalendarProvider;
use crate::storage::SyncDb;

use super::retry::RetryConfig;
use super::writer::SyncWriter;
use super::{
    ConflictPolicy, ConflictSeverity, ConflictType, FieldDiff, ResolutionChoice,
    ResolutionStatus, SyncConfiguration, SyncConflict, SyncError,
};

const TIME_FIELDS: [&str; 3] = ["start", "end", "all_day"];

/// Detects, stores and resolves divergences between items and events.
pub struct ConflictResolutionService<'a> {
    writer: SyncWriter<'a>,
}

fn minute(ts: DateTime<Utc>) -> i64 {
    ts.timestamp().div_euclid(60)
}

fn normalize_opt(text: Option<&str>) -> String {
    text.map(collapse_whitespace).unwrap_or_default()
}

/// Concatenate differing texts; keep whichever side exists otherwise.
fn merge_optional_text(local: Option<&str>, remote: Option<&str>) -> Option<String> {
    match (local, remote) {
        (Some(l), Some(r)) if collapse_whitespace(l) != collapse_whitespace(r) => {
            Some(format!("{l}\n---\n{r}"))
        }
        (Some(l), _) => Some(l.to_string()),
        (None, Some(r)) => Some(r.to_string()),
        (None, None) => None,
    }
}

fn merge_reminders(local: &[Reminder], remote: &[Reminder]) -> Vec<Reminder> {
    let mut merged: Vec<Reminder> = local.iter().chain(remote).copied().collect();
    merged.sort();
    merged.dedup();
    merged
}

impl<'a> ConflictResolutionService<'a> {
    pub fn new(
        db: &'a SyncDb,
        provider: &'a dyn CalendarProvider,
        config: &SyncConfiguration,
    ) -> Self {
        let retry = RetryConfig {
            max_retries: config.retry_attempts,
            ..RetryConfig::default()
        };
        Self {
            writer: SyncWriter::new(db, provider, config, retry),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.writer.retry = retry;
        self
    }

    fn db(&self) -> &'a SyncDb {
        self.writer.db
    }

    /// Field-level differences between `local` (as it would be exported) and
    /// `remote`. Times compare at minute precision, text after whitespace
    /// normalization, reminders as sets of what the provider can store.
    pub fn compare(
        &self,
        local: &Assignment,
        remote: &NormalizedCalendarEvent,
    ) -> Result<Vec<FieldDiff>, SyncError> {
        let mine = self.writer.mapper.to_event(local)?;
        let provider = self.writer.provider.kind();
        let mut diffs = Vec::new();
        let mut diff = |field: &str, local: serde_json::Value, remote: serde_json::Value| {
            diffs.push(FieldDiff {
                field: field.to_string(),
                local,
                remote,
            });
        };

        if collapse_whitespace(&mine.title) != collapse_whitespace(&remote.title) {
            diff("title", json!(mine.title), json!(remote.title));
        }
        if normalize_opt(mine.description.as_deref()) != normalize_opt(remote.description.as_deref())
        {
            diff("description", json!(mine.description), json!(remote.description));
        }
        if normalize_opt(mine.location.as_deref()) != normalize_opt(remote.location.as_deref()) {
            diff("location", json!(mine.location), json!(remote.location));
        }
        if minute(mine.start) != minute(remote.start) {
            diff("start", json!(mine.start), json!(remote.start));
        }
        if minute(mine.end) != minute(remote.end) {
            diff("end", json!(mine.end), json!(remote.end));
        }
        if mine.all_day != remote.all_day {
            diff("all_day", json!(mine.all_day), json!(remote.all_day));
        }

        let ours = fields::project_reminders(provider, &mine.reminders);
        let theirs = fields::project_reminders(provider, &remote.reminders);
        if ours != theirs {
            diff("reminders", json!(ours), json!(theirs));
        }

        let weekday = timezone::to_local(mine.start, &mine.timezone)?.weekday();
        let ours = mine.recurrence.as_ref().map(|r| recurrence::canonical(r, weekday));
        let theirs = remote
            .recurrence
            .as_ref()
            .map(|r| recurrence::canonical(r, weekday));
        if ours != theirs {
            diff("recurrence", json!(ours), json!(theirs));
        }

        Ok(diffs)
    }

    /// Type and severity for a divergence. `kind` is the structural kind;
    /// field mismatches are split into time and content by `diffs`.
    pub fn classify(diffs: &[FieldDiff], kind: ConflictType) -> (ConflictType, ConflictSeverity) {
        match kind {
            ConflictType::DeletionConflict | ConflictType::DuplicateMapping => {
                (kind, ConflictSeverity::High)
            }
            ConflictType::CreationConflict => (kind, ConflictSeverity::Medium),
            ConflictType::TimeMismatch | ConflictType::ContentMismatch => {
                let has = |name: &str| diffs.iter().any(|d| d.field == name);
                if TIME_FIELDS.iter().any(|f| has(f)) {
                    let moved_far = diffs
                        .iter()
                        .find(|d| d.field == "start")
                        .and_then(|d| {
                            let l: DateTime<Utc> = serde_json::from_value(d.local.clone()).ok()?;
                            let r: DateTime<Utc> = serde_json::from_value(d.remote.clone()).ok()?;
                            Some((l - r).num_seconds().abs() > 24 * 3600)
                        })
                        .unwrap_or(false);
                    let severity = if moved_far || has("all_day") {
                        ConflictSeverity::High
                    } else {
                        ConflictSeverity::Medium
                    };
                    (ConflictType::TimeMismatch, severity)
                } else if has("title") {
                    (ConflictType::ContentMismatch, ConflictSeverity::Medium)
                } else {
                    (ConflictType::ContentMismatch, ConflictSeverity::Low)
                }
            }
        }
    }

    /// Choice the policy makes for `conflict`, if any.
    pub fn decide(conflict: &SyncConflict, policy: ConflictPolicy) -> Option<ResolutionChoice> {
        if conflict.conflict_type == ConflictType::DuplicateMapping {
            return None;
        }
        match policy {
            ConflictPolicy::Manual => None,
            ConflictPolicy::CalendarWins => Some(ResolutionChoice::UseRemote),
            ConflictPolicy::AssignmentWins => Some(ResolutionChoice::UseLocal),
            ConflictPolicy::NewestWins => {
                match (&conflict.local_snapshot, &conflict.remote_snapshot) {
                    (Some(local), Some(remote)) if local.updated_at > remote.updated_at => {
                        Some(ResolutionChoice::UseLocal)
                    }
                    (Some(_), None) => Some(ResolutionChoice::UseLocal),
                    _ => Some(ResolutionChoice::UseRemote),
                }
            }
        }
    }

    /// Field merge: the newer side wins scalar fields, differing
    /// descriptions are concatenated and reminders are unioned.
    pub fn merge(&self, local: &Assignment, remote: &NormalizedCalendarEvent) -> Assignment {
        let mut theirs = local.clone();
        self.writer.mapper.apply_event(&mut theirs, remote);

        let mut merged = if remote.updated_at >= local.updated_at {
            theirs.clone()
        } else {
            local.clone()
        };
        merged.description =
            merge_optional_text(local.description.as_deref(), theirs.description.as_deref());
        merged.reminders = merge_reminders(&local.reminders, &theirs.reminders);
        if !remote.id.is_empty() {
            merged.external_event_id = Some(remote.id.clone());
        }
        merged.touch();
        merged
    }

    /// Store a detected conflict. A pending conflict for the same pair is
    /// refreshed in place instead of duplicated.
    pub fn record(&self, mut conflict: SyncConflict) -> Result<SyncConflict, SyncError> {
        if let Some(existing) = self
            .db()
            .find_pending_conflict(conflict.local_id.as_deref(), conflict.external_id.as_deref())?
        {
            conflict.id = existing.id;
            conflict.detected_at = existing.detected_at;
        }
        self.db().upsert_conflict(&conflict)?;
        tracing::warn!(
            conflict_id = %conflict.id,
            conflict_type = conflict.conflict_type.as_str(),
            severity = conflict.severity.as_str(),
            local_id = ?conflict.local_id,
            external_id = ?conflict.external_id,
            "conflict detected"
        );
        Ok(conflict)
    }

    /// Whether the user already dismissed this exact pair.
    pub(crate) fn was_ignored(
        &self,
        local_id: &str,
        external_id: &str,
        kind: ConflictType,
    ) -> Result<bool, SyncError> {
        Ok(self
            .db()
            .find_conflict(Some(local_id), Some(external_id), ResolutionStatus::Ignored)?
            .is_some_and(|c| c.conflict_type == kind))
    }

    pub fn list(&self, status: Option<ResolutionStatus>) -> Result<Vec<SyncConflict>, SyncError> {
        Ok(self.db().list_conflicts(status)?)
    }

    pub fn get(&self, id: &str) -> Result<SyncConflict, SyncError> {
        self.db()
            .get_conflict(id)?
            .ok_or_else(|| SyncError::ConflictNotFound(id.to_string()))
    }

    fn get_pending(&self, id: &str) -> Result<SyncConflict, SyncError> {
        let conflict = self.get(id)?;
        if !conflict.is_pending() {
            return Err(SyncError::ConflictClosed(id.to_string()));
        }
        Ok(conflict)
    }

    /// Apply `choice` to both stores and close the conflict.
    pub async fn resolve(
        &self,
        id: &str,
        choice: ResolutionChoice,
    ) -> Result<SyncConflict, SyncError> {
        self.resolve_with(id, choice, false).await
    }

    pub(crate) async fn resolve_with(
        &self,
        id: &str,
        choice: ResolutionChoice,
        auto: bool,
    ) -> Result<SyncConflict, SyncError> {
        let mut conflict = self.get_pending(id)?;
        self.apply(&conflict, choice).await?;

        conflict.status = ResolutionStatus::Resolved;
        conflict.resolution = Some(choice);
        conflict.auto_resolved = auto;
        conflict.resolved_at = Some(Utc::now());
        self.db().upsert_conflict(&conflict)?;
        tracing::info!(conflict_id = id, ?choice, auto, "conflict resolved");
        Ok(conflict)
    }

    async fn live_remote(&self, id: Option<&str>) -> Result<NormalizedCalendarEvent, SyncError> {
        let id = id.ok_or_else(|| SyncError::EventNotFound("conflict has no event".into()))?;
        self.writer
            .fetch_remote(id)
            .await?
            .filter(|e| !e.is_cancelled())
            .ok_or_else(|| SyncError::EventNotFound(id.to_string()))
    }

    async fn apply(&self, conflict: &SyncConflict, choice: ResolutionChoice) -> Result<(), SyncError> {
        let kind = conflict.conflict_type;
        if choice == ResolutionChoice::Merge
            && matches!(kind, ConflictType::DeletionConflict | ConflictType::DuplicateMapping)
        {
            return Err(SyncError::UnsupportedResolution {
                conflict_type: kind,
                choice,
            });
        }

        let local_id = conflict
            .local_id
            .as_deref()
            .ok_or_else(|| SyncError::AssignmentNotFound(conflict.id.clone()))?;
        let local = self.db().get_assignment(local_id)?;
        let mapping = self.writer.mappings().find_by_local(local_id)?;
        let external_id = conflict
            .external_id
            .clone()
            .or_else(|| mapping.as_ref().map(|m| m.external_id.clone()));
        let live_local = || {
            local
                .clone()
                .filter(|i| !i.is_deleted())
                .ok_or_else(|| SyncError::AssignmentNotFound(local_id.to_string()))
        };

        match kind {
            ConflictType::TimeMismatch
            | ConflictType::ContentMismatch
            | ConflictType::CreationConflict => {
                let mut item = live_local()?;
                let remote = self.live_remote(external_id.as_deref()).await?;
                self.overwrite(&mut item, &remote, mapping, choice).await
            }
            ConflictType::DeletionConflict => {
                let local_deleted = local.as_ref().map_or(true, Assignment::is_deleted);
                if local_deleted {
                    let event_id = external_id
                        .ok_or_else(|| SyncError::EventNotFound(conflict.id.clone()))?;
                    match choice {
                        ResolutionChoice::UseLocal => {
                            self.writer.remove_remote(&event_id, Some(local_id)).await
                        }
                        _ => {
                            let remote = self.live_remote(Some(&event_id)).await?;
                            match local.clone() {
                                Some(mut tombstone) => {
                                    self.writer.import_into(&mut tombstone, &remote, mapping)
                                }
                                None => {
                                    self.writer.mappings().unlink(local_id)?;
                                    let category = conflict
                                        .local_snapshot
                                        .as_ref()
                                        .map(|s| s.category)
                                        .unwrap_or_default();
                                    self.writer.import_new(&remote, category).map(|_| ())
                                }
                            }
                        }
                    }
                } else {
                    let mut item = live_local()?;
                    match choice {
                        ResolutionChoice::UseLocal => self
                            .writer
                            .recreate_remote(&mut item, mapping)
                            .await
                            .map(|_| ()),
                        _ => self.writer.remove_local(local_id),
                    }
                }
            }
            ConflictType::DuplicateMapping => {
                let claimant = external_id
                    .ok_or_else(|| SyncError::EventNotFound(conflict.id.clone()))?;
                match choice {
                    ResolutionChoice::UseLocal => self.writer.untag_remote(&claimant).await,
                    _ => {
                        let mut item = live_local()?;
                        let remote = self.live_remote(Some(&claimant)).await?;
                        if let Some(m) = mapping.as_ref().filter(|m| m.external_id != claimant) {
                            self.writer.untag_remote(&m.external_id).await?;
                        }
                        self.writer.import_into(&mut item, &remote, mapping)
                    }
                }
            }
        }
    }

    /// Make item and event equal according to `choice`.
    async fn overwrite(
        &self,
        item: &mut Assignment,
        remote: &NormalizedCalendarEvent,
        mapping: Option<CalendarEventMapping>,
        choice: ResolutionChoice,
    ) -> Result<(), SyncError> {
        match choice {
            ResolutionChoice::UseLocal => {
                self.writer.export_to(item, &remote.id, mapping).await?;
            }
            ResolutionChoice::UseRemote => self.writer.import_into(item, remote, mapping)?,
            ResolutionChoice::Merge => {
                let mut merged = self.merge(item, remote);
                self.writer.export_to(&mut merged, &remote.id, mapping).await?;
                *item = merged;
            }
        }
        Ok(())
    }

    /// Close as ignored. Watermarks move to the current versions so the same
    /// divergence is not raised again.
    pub async fn ignore(&self, id: &str) -> Result<SyncConflict, SyncError> {
        let mut conflict = self.get_pending(id)?;

        if let Some(local_id) = conflict.local_id.as_deref() {
            let local = self.db().get_assignment(local_id)?;
            let mappings = self.writer.mappings();
            let mapped_pair = matches!(
                conflict.conflict_type,
                ConflictType::TimeMismatch
                    | ConflictType::ContentMismatch
                    | ConflictType::DeletionConflict
            );
            if mapped_pair {
                if let Some(mut m) = mappings.find_by_local(local_id)? {
                    let local_ts = local.as_ref().map(|i| i.updated_at).or(m.local_updated_at);
                    let remote = self.writer.fetch_remote(&m.external_id).await?;
                    match (local_ts, remote) {
                        (Some(ts), Some(remote)) => mappings.record_synced(&mut m, ts, &remote)?,
                        _ => {
                            m.local_updated_at = local_ts;
                            m.sync_status = crate::mapping::MappingStatus::Synced;
                            self.db().update_mapping(&m)?;
                        }
                    }
                }
            }
            if let Some(item) = local.filter(|i| i.sync_status == ItemSyncStatus::Conflict) {
                let status = if item.external_event_id.is_some() && mapped_pair {
                    ItemSyncStatus::Synced
                } else {
                    ItemSyncStatus::Local
                };
                self.db().set_assignment_status(&item.id, status)?;
            }
        }

        conflict.status = ResolutionStatus::Ignored;
        conflict.resolved_at = Some(Utc::now());
        self.db().upsert_conflict(&conflict)?;
        tracing::info!(conflict_id = id, "conflict ignored");
        Ok(conflict)
    }

    /// Resolve every pending conflict the policy has an answer for.
    /// Returns how many were resolved; failures stay pending.
    pub async fn auto_resolve_pending(&self, policy: ConflictPolicy) -> Result<usize, SyncError> {
        let mut resolved = 0;
        for conflict in self.list(Some(ResolutionStatus::Pending))? {
            let Some(choice) = Self::decide(&conflict, policy) else {
                continue;
            };
            match self.resolve_with(&conflict.id, choice, true).await {
                Ok(_) => resolved += 1,
                Err(e) => {
                    tracing::warn!(conflict_id = %conflict.id, error = %e, "auto-resolution failed")
                }
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssignmentCategory, Frequency, ProviderKind, RecurrenceRule};
    use crate::provider::MemoryProvider;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn config() -> SyncConfiguration {
        SyncConfiguration {
            provider: ProviderKind::Memory,
            ..SyncConfiguration::default()
        }
    }

    fn item() -> Assignment {
        let mut item = Assignment::new(
            "Essay",
            Utc.with_ymd_and_hms(2025, 2, 10, 14, 0, 0).unwrap(),
        );
        item.course = Some("CS101".into());
        item.description = Some("Two pages".into());
        item
    }

    fn diff(field: &str, local: serde_json::Value, remote: serde_json::Value) -> FieldDiff {
        FieldDiff {
            field: field.into(),
            local,
            remote,
        }
    }

    #[test]
    fn compare_ignores_whitespace_seconds_and_reminder_order() {
        let db = SyncDb::open_memory().unwrap();
        let cal = MemoryProvider::new();
        let svc = ConflictResolutionService::new(&db, &cal, &config());

        let local = item();
        let mut remote = svc.writer.mapper.to_event(&local).unwrap();
        remote.title = "  CS101:   Essay ".into();
        remote.start += Duration::seconds(20);
        remote.reminders.reverse();
        assert!(svc.compare(&local, &remote).unwrap().is_empty());

        remote.location = Some("Library".into());
        remote.end += Duration::hours(1);
        let fields: Vec<_> = svc
            .compare(&local, &remote)
            .unwrap()
            .into_iter()
            .map(|d| d.field)
            .collect();
        assert_eq!(fields, vec!["location", "end"]);
    }

    #[test]
    fn compare_uses_canonical_recurrence() {
        let db = SyncDb::open_memory().unwrap();
        let cal = MemoryProvider::new();
        let svc = ConflictResolutionService::new(&db, &cal, &config());

        let mut local = item();
        local.recurrence = Some(RecurrenceRule::new(Frequency::Weekly));
        let mut remote = svc.writer.mapper.to_event(&local).unwrap();
        // 2025-02-10 is a Monday.
        remote.recurrence = Some(RecurrenceRule {
            by_day: vec![chrono::Weekday::Mon],
            ..RecurrenceRule::new(Frequency::Weekly)
        });
        assert!(svc.compare(&local, &remote).unwrap().is_empty());
    }

    #[test]
    fn classify_time_and_content() {
        let start = Utc.with_ymd_and_hms(2025, 2, 10, 14, 0, 0).unwrap();
        let small = vec![diff("start", json!(start), json!(start + Duration::hours(2)))];
        assert_eq!(
            ConflictResolutionService::classify(&small, ConflictType::ContentMismatch),
            (ConflictType::TimeMismatch, ConflictSeverity::Medium)
        );

        let far = vec![diff("start", json!(start), json!(start + Duration::days(3)))];
        assert_eq!(
            ConflictResolutionService::classify(&far, ConflictType::TimeMismatch).1,
            ConflictSeverity::High
        );

        let flip = vec![diff("all_day", json!(false), json!(true))];
        assert_eq!(
            ConflictResolutionService::classify(&flip, ConflictType::TimeMismatch).1,
            ConflictSeverity::High
        );

        let title = vec![diff("title", json!("a"), json!("b"))];
        assert_eq!(
            ConflictResolutionService::classify(&title, ConflictType::TimeMismatch),
            (ConflictType::ContentMismatch, ConflictSeverity::Medium)
        );

        let location = vec![diff("location", json!("a"), json!("b"))];
        assert_eq!(
            ConflictResolutionService::classify(&location, ConflictType::ContentMismatch).1,
            ConflictSeverity::Low
        );

        assert_eq!(
            ConflictResolutionService::classify(&[], ConflictType::DeletionConflict).1,
            ConflictSeverity::High
        );
        assert_eq!(
            ConflictResolutionService::classify(&[], ConflictType::CreationConflict).1,
            ConflictSeverity::Medium
        );
    }

    #[test]
    fn decide_follows_policy() {
        let db = SyncDb::open_memory().unwrap();
        let cal = MemoryProvider::new();
        let svc = ConflictResolutionService::new(&db, &cal, &config());
        let local = item();
        let mut remote = svc.writer.mapper.to_event(&local).unwrap();
        remote.updated_at = local.updated_at;

        let mut conflict = SyncConflict::new(
            ProviderKind::Memory,
            ConflictType::ContentMismatch,
            ConflictSeverity::Low,
            Some(local.clone()),
            Some(remote.clone()),
        );
        let decide = ConflictResolutionService::decide;
        assert_eq!(decide(&conflict, ConflictPolicy::Manual), None);
        assert_eq!(
            decide(&conflict, ConflictPolicy::CalendarWins),
            Some(ResolutionChoice::UseRemote)
        );
        assert_eq!(
            decide(&conflict, ConflictPolicy::AssignmentWins),
            Some(ResolutionChoice::UseLocal)
        );
        // Ties go to the calendar.
        assert_eq!(
            decide(&conflict, ConflictPolicy::NewestWins),
            Some(ResolutionChoice::UseRemote)
        );
        conflict.local_snapshot.as_mut().unwrap().updated_at += Duration::seconds(1);
        assert_eq!(
            decide(&conflict, ConflictPolicy::NewestWins),
            Some(ResolutionChoice::UseLocal)
        );

        conflict.conflict_type = ConflictType::DuplicateMapping;
        assert_eq!(decide(&conflict, ConflictPolicy::CalendarWins), None);
    }

    #[test]
    fn merge_combines_descriptions_and_reminders() {
        let db = SyncDb::open_memory().unwrap();
        let cal = MemoryProvider::new();
        let svc = ConflictResolutionService::new(&db, &cal, &config());

        let mut local = item();
        local.reminders = vec![Reminder::popup(60)];
        local.category = AssignmentCategory::Exam;
        let mut remote = svc.writer.mapper.to_event(&local).unwrap();
        remote.id = "mem-1".into();
        remote.title = "CS101: Final essay".into();
        remote.description = Some("Three pages".into());
        remote.reminders = vec![Reminder::popup(10)];
        remote.updated_at = local.updated_at + Duration::minutes(5);

        let merged = svc.merge(&local, &remote);
        assert_eq!(merged.title, "Final essay");
        assert_eq!(merged.description.as_deref(), Some("Two pages\n---\nThree pages"));
        assert_eq!(merged.reminders, vec![Reminder::popup(10), Reminder::popup(60)]);
        assert_eq!(merged.category, AssignmentCategory::Exam);
        assert_eq!(merged.external_event_id.as_deref(), Some("mem-1"));
        assert!(merged.updated_at >= local.updated_at);
    }

    #[test]
    fn record_refreshes_pending_conflict() {
        let db = SyncDb::open_memory().unwrap();
        let cal = MemoryProvider::new();
        let svc = ConflictResolutionService::new(&db, &cal, &config());
        let local = item();
        let mut remote = svc.writer.mapper.to_event(&local).unwrap();
        remote.id = "mem-1".into();

        let first = svc
            .record(SyncConflict::new(
                ProviderKind::Memory,
                ConflictType::ContentMismatch,
                ConflictSeverity::Low,
                Some(local.clone()),
                Some(remote.clone()),
            ))
            .unwrap();
        remote.title = "changed again".into();
        let second = svc
            .record(SyncConflict::new(
                ProviderKind::Memory,
                ConflictType::ContentMismatch,
                ConflictSeverity::Medium,
                Some(local),
                Some(remote),
            ))
            .unwrap();

        assert_eq!(first.id, second.id);
        let stored = svc.list(None).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].remote_snapshot.as_ref().unwrap().title, "changed again");
    }

    #[tokio::test]
    async fn resolve_rejects_closed_and_unsupported() {
        let db = SyncDb::open_memory().unwrap();
        let cal = MemoryProvider::new();
        let svc = ConflictResolutionService::new(&db, &cal, &config());
        let local = item();
        db.upsert_assignment(&local).unwrap();

        let conflict = svc
            .record(SyncConflict::new(
                ProviderKind::Memory,
                ConflictType::DuplicateMapping,
                ConflictSeverity::High,
                Some(local),
                None,
            ))
            .unwrap();
        assert!(matches!(
            svc.resolve(&conflict.id, ResolutionChoice::Merge).await,
            Err(SyncError::UnsupportedResolution { .. })
        ));

        svc.ignore(&conflict.id).await.unwrap();
        assert!(matches!(
            svc.resolve(&conflict.id, ResolutionChoice::UseLocal).await,
            Err(SyncError::ConflictClosed(_))
        ));
        assert!(matches!(
            svc.get("missing"),
            Err(SyncError::ConflictNotFound(_))
        ));
    }

    proptest! {
        #[test]
        fn merged_reminders_contain_both_sides(
            a in proptest::collection::vec(0u32..10_000, 0..6),
            b in proptest::collection::vec(0u32..10_000, 0..6),
        ) {
            let local: Vec<Reminder> = a.iter().map(|m| Reminder::popup(*m)).collect();
            let remote: Vec<Reminder> = b.iter().map(|m| Reminder::email(*m)).collect();
            let merged = merge_reminders(&local, &remote);
            for r in local.iter().chain(&remote) {
                prop_assert!(merged.contains(r));
            }
            prop_assert!(merged.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn merged_text_keeps_both_sides(l in "[a-z ]{0,20}", r in "[a-z ]{0,20}") {
            let merged = merge_optional_text(Some(&l), Some(&r)).unwrap();
            prop_assert!(merged.contains(&l));
            if collapse_whitespace(&l) != collapse_whitespace(&r) {
                prop_assert!(merged.contains(&r));
            }
        }
    }
}
