//! Assignment <-> calendar event conversion.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use super::timezone::{self, date_start_utc};
use crate::error::ValidationError;
use crate::model::{
    Assignment, AssignmentCategory, EventStatus, ItemSyncStatus, NormalizedCalendarEvent,
    ProviderKind, Reminder,
};
use crate::sync::SyncConfiguration;

/// Converts between local items and provider-neutral events.
#[derive(Debug, Clone)]
pub struct AssignmentEventMapper {
    pub provider: ProviderKind,
    pub calendar_id: String,
    pub default_duration_minutes: u32,
    pub default_reminders: Vec<Reminder>,
}

impl AssignmentEventMapper {
    pub fn from_config(config: &SyncConfiguration) -> Self {
        Self {
            provider: config.provider,
            calendar_id: config.calendar_id.clone(),
            default_duration_minutes: config.default_duration_minutes,
            default_reminders: config.default_reminders.clone(),
        }
    }

    /// "CS101: Essay" when the item has a course code.
    pub fn event_title(item: &Assignment) -> String {
        match item.course.as_deref().map(str::trim) {
            Some(course) if !course.is_empty() => {
                if item.title.starts_with(&format!("{course}:")) {
                    item.title.clone()
                } else {
                    format!("{course}: {}", item.title)
                }
            }
            _ => item.title.clone(),
        }
    }

    /// Split a leading course code off an event title.
    ///
    /// A code is 2-12 ASCII alphanumerics with at least one digit and one
    /// uppercase letter, followed by `:`.
    pub fn split_title(title: &str) -> (Option<String>, String) {
        if let Some((head, rest)) = title.split_once(':') {
            let head = head.trim();
            let rest = rest.trim();
            let looks_like_code = (2..=12).contains(&head.len())
                && head.chars().all(|c| c.is_ascii_alphanumeric())
                && head.chars().any(|c| c.is_ascii_digit())
                && head.chars().any(|c| c.is_ascii_uppercase());
            if looks_like_code && !rest.is_empty() {
                return (Some(head.to_string()), rest.to_string());
            }
        }
        (None, title.trim().to_string())
    }

    pub fn effective_reminders(&self, item: &Assignment) -> Vec<Reminder> {
        if item.reminders.is_empty() {
            self.default_reminders.clone()
        } else {
            item.reminders.clone()
        }
    }

    /// `[start, end)` of an all-day item as dates in its own timezone.
    fn all_day_dates(&self, item: &Assignment) -> Result<(NaiveDate, NaiveDate), ValidationError> {
        let first = timezone::local_date(item.start_time, &item.timezone)?;
        let last = match item.end_time {
            Some(end) if end > item.start_time => {
                timezone::local_date(end - Duration::seconds(1), &item.timezone)?
                    + Duration::days(1)
            }
            _ => first + Duration::days(1),
        };
        Ok((first, last.max(first + Duration::days(1))))
    }

    /// Event for `item`, ready to create or update.
    pub fn to_event(&self, item: &Assignment) -> Result<NormalizedCalendarEvent, ValidationError> {
        timezone::validate_timezone(&item.timezone)?;

        let (start, end) = if item.all_day {
            let (first, last) = self.all_day_dates(item)?;
            (date_start_utc(first), date_start_utc(last))
        } else {
            (
                item.start_time,
                item.effective_end(self.default_duration_minutes),
            )
        };

        Ok(NormalizedCalendarEvent {
            id: item.external_event_id.clone().unwrap_or_default(),
            provider: self.provider,
            calendar_id: self.calendar_id.clone(),
            title: Self::event_title(item),
            description: item.description.clone(),
            location: item.location.clone(),
            start,
            end,
            all_day: item.all_day,
            timezone: item.timezone.clone(),
            recurrence: item.recurrence.clone(),
            reminders: self.effective_reminders(item),
            color: Some(item.effective_color()),
            status: EventStatus::Confirmed,
            updated_at: item.updated_at,
            etag: None,
            local_id: Some(item.id.clone()),
        })
    }

    /// Start/end instants for an all-day event interpreted in `tz`.
    fn all_day_instants(
        event: &NormalizedCalendarEvent,
        tz: &str,
    ) -> (DateTime<Utc>, DateTime<Utc>) {
        let (first, last) = timezone::all_day_dates(event.start, event.end);
        let at_midnight = |date: NaiveDate| {
            date.and_hms_opt(0, 0, 0)
                .and_then(|naive| timezone::from_local(naive, tz).ok())
                .unwrap_or_else(|| date_start_utc(date))
        };
        (at_midnight(first), at_midnight(last))
    }

    /// New local item for an imported event.
    pub fn to_assignment(
        &self,
        event: &NormalizedCalendarEvent,
        category: AssignmentCategory,
    ) -> Assignment {
        let (course, title) = Self::split_title(&event.title);
        let tz = timezone::normalize_or_utc(&event.timezone);
        let (start_time, end_time) = if event.all_day {
            Self::all_day_instants(event, &tz)
        } else {
            (event.start, event.end)
        };
        let color = event
            .color
            .filter(|c| *c != category.default_color());

        let now = Utc::now();
        Assignment {
            id: Uuid::new_v4().to_string(),
            title,
            description: event.description.clone(),
            course,
            category,
            start_time,
            end_time: Some(end_time),
            all_day: event.all_day,
            timezone: tz,
            location: event.location.clone(),
            reminders: event.reminders.clone(),
            recurrence: event.recurrence.clone(),
            color,
            completed: false,
            external_event_id: Some(event.id.clone()),
            sync_status: ItemSyncStatus::Synced,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite the synced fields of `item` from `event` and bump
    /// `updated_at`. Course, category and completion stay local.
    pub fn apply_event(&self, item: &mut Assignment, event: &NormalizedCalendarEvent) {
        let (prefix, rest) = Self::split_title(&event.title);
        item.title = match (&prefix, &item.course) {
            (Some(p), Some(course)) if p == course => rest,
            _ => event.title.trim().to_string(),
        };
        item.description = event.description.clone();
        item.location = event.location.clone();
        item.all_day = event.all_day;
        if event.all_day {
            let (start, end) = Self::all_day_instants(event, &item.timezone);
            item.start_time = start;
            item.end_time = Some(end);
        } else {
            item.start_time = event.start;
            item.end_time = Some(event.end);
        }
        item.reminders = event.reminders.clone();
        item.recurrence = event.recurrence.clone();
        if let Some(color) = event.color {
            item.color = (color != item.category.default_color()).then_some(color);
        }
        item.external_event_id = Some(event.id.clone());
        item.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventColor;
    use chrono::TimeZone;

    fn mapper() -> AssignmentEventMapper {
        AssignmentEventMapper::from_config(&SyncConfiguration {
            provider: ProviderKind::Memory,
            ..SyncConfiguration::default()
        })
    }

    fn essay() -> Assignment {
        let mut item = Assignment::new(
            "Essay",
            Utc.with_ymd_and_hms(2025, 2, 10, 14, 0, 0).unwrap(),
        );
        item.course = Some("CS101".into());
        item
    }

    #[test]
    fn title_gets_course_prefix_once() {
        let mut item = essay();
        assert_eq!(AssignmentEventMapper::event_title(&item), "CS101: Essay");
        item.title = "CS101: Essay".into();
        assert_eq!(AssignmentEventMapper::event_title(&item), "CS101: Essay");
        item.course = None;
        assert_eq!(AssignmentEventMapper::event_title(&item), "CS101: Essay");
    }

    #[test]
    fn split_title_recognizes_course_codes() {
        assert_eq!(
            AssignmentEventMapper::split_title("MATH201: Problem set 4"),
            (Some("MATH201".into()), "Problem set 4".into())
        );
        assert_eq!(
            AssignmentEventMapper::split_title("Reminder: call mom"),
            (None, "Reminder: call mom".into())
        );
        assert_eq!(
            AssignmentEventMapper::split_title("CS101:"),
            (None, "CS101:".into())
        );
    }

    #[test]
    fn to_event_applies_defaults() {
        let m = mapper();
        let item = essay();
        let event = m.to_event(&item).unwrap();

        assert_eq!(event.title, "CS101: Essay");
        assert_eq!(event.end - event.start, Duration::minutes(60));
        assert_eq!(event.reminders, m.default_reminders);
        assert_eq!(event.color, Some(EventColor::Blue));
        assert_eq!(event.local_id.as_deref(), Some(item.id.as_str()));
        assert!(event.id.is_empty());
    }

    #[test]
    fn to_event_rejects_unknown_timezone() {
        let mut item = essay();
        item.timezone = "Nowhere/Land".into();
        assert!(mapper().to_event(&item).is_err());
    }

    #[test]
    fn all_day_uses_local_date() {
        let m = mapper();
        let mut item = essay();
        item.all_day = true;
        item.timezone = "America/Los_Angeles".into();
        // 02:00 UTC on the 11th is still the 10th in Los Angeles.
        item.start_time = Utc.with_ymd_and_hms(2025, 2, 11, 2, 0, 0).unwrap();

        let event = m.to_event(&item).unwrap();
        assert_eq!(event.start, Utc.with_ymd_and_hms(2025, 2, 10, 0, 0, 0).unwrap());
        assert_eq!(event.end, Utc.with_ymd_and_hms(2025, 2, 11, 0, 0, 0).unwrap());
    }

    #[test]
    fn imported_all_day_event_exports_to_same_dates() {
        let m = mapper();
        let mut event = m.to_event(&essay()).unwrap();
        event.all_day = true;
        event.timezone = "Asia/Tokyo".into();
        event.start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        event.end = Utc.with_ymd_and_hms(2025, 3, 3, 0, 0, 0).unwrap();

        let item = m.to_assignment(&event, AssignmentCategory::Exam);
        let again = m.to_event(&item).unwrap();
        assert_eq!((again.start, again.end), (event.start, event.end));
    }

    #[test]
    fn to_assignment_strips_prefix() {
        let m = mapper();
        let mut event = m.to_event(&essay()).unwrap();
        event.id = "evt-1".into();
        event.color = Some(EventColor::Red);

        let item = m.to_assignment(&event, AssignmentCategory::Exam);
        assert_eq!(item.title, "Essay");
        assert_eq!(item.course.as_deref(), Some("CS101"));
        assert_eq!(item.external_event_id.as_deref(), Some("evt-1"));
        // Red is the exam default, so no explicit color is stored.
        assert_eq!(item.color, None);
        assert_eq!(item.sync_status, ItemSyncStatus::Synced);
    }

    #[test]
    fn apply_event_keeps_local_only_fields() {
        let m = mapper();
        let mut item = essay();
        item.category = AssignmentCategory::Project;
        item.completed = true;
        let before = item.updated_at;

        let mut event = m.to_event(&item).unwrap();
        event.title = "CS101: Final essay".into();
        event.location = Some("Library".into());
        event.start += Duration::hours(2);
        event.end += Duration::hours(2);

        m.apply_event(&mut item, &event);
        assert_eq!(item.title, "Final essay");
        assert_eq!(item.location.as_deref(), Some("Library"));
        assert_eq!(item.start_time, event.start);
        assert_eq!(item.category, AssignmentCategory::Project);
        assert!(item.completed);
        assert_eq!(item.course.as_deref(), Some("CS101"));
        assert!(item.updated_at >= before);
    }
}
