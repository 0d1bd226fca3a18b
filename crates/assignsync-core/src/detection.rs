//! Deciding whether a calendar event is an academic item.

use crate::mapping::AssignmentEventMapper;
use crate::model::{AssignmentCategory, NormalizedCalendarEvent};

/// Classifies unmapped calendar events during import.
/// `None` means the event is not an academic item and is left alone.
pub trait EventClassifier: Send + Sync {
    fn classify(&self, event: &NormalizedCalendarEvent) -> Option<AssignmentCategory>;
}

/// Ordered keyword rules; the first rule with a matching word wins.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    rules: Vec<(AssignmentCategory, Vec<String>)>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        let rule = |category, words: &[&str]| {
            (category, words.iter().map(|w| w.to_string()).collect())
        };
        Self {
            rules: vec![
                rule(AssignmentCategory::Exam, &["exam", "midterm", "final", "finals"]),
                rule(AssignmentCategory::Quiz, &["quiz"]),
                rule(AssignmentCategory::Project, &["project"]),
                rule(AssignmentCategory::Lab, &["lab"]),
                rule(AssignmentCategory::Lecture, &["lecture", "class", "seminar"]),
                rule(AssignmentCategory::Reading, &["reading", "chapter"]),
                rule(
                    AssignmentCategory::Assignment,
                    &[
                        "assignment",
                        "homework",
                        "hw",
                        "essay",
                        "problem set",
                        "due",
                        "submission",
                    ],
                ),
            ],
        }
    }
}

/// Lowercase, non-alphanumerics to spaces, padded so `" word "` matches
/// whole words only.
fn word_text(s: &str) -> String {
    let mapped: String = s
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    format!(" {} ", mapped.split_whitespace().collect::<Vec<_>>().join(" "))
}

impl KeywordClassifier {
    /// Empty rule set; only course-code titles are recognized.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a rule after the existing ones.
    pub fn with_rule(mut self, category: AssignmentCategory, words: &[&str]) -> Self {
        self.rules
            .push((category, words.iter().map(|w| w.to_lowercase()).collect()));
        self
    }

    fn match_text(&self, text: &str) -> Option<AssignmentCategory> {
        let text = word_text(text);
        self.rules.iter().find_map(|(category, words)| {
            words
                .iter()
                .any(|w| text.contains(&word_text(w)))
                .then_some(*category)
        })
    }
}

impl EventClassifier for KeywordClassifier {
    fn classify(&self, event: &NormalizedCalendarEvent) -> Option<AssignmentCategory> {
        if let Some(category) = self.match_text(&event.title) {
            return Some(category);
        }
        if let Some(category) = event.description.as_deref().and_then(|d| self.match_text(d)) {
            return Some(category);
        }
        match AssignmentEventMapper::split_title(&event.title) {
            (Some(_), _) => Some(AssignmentCategory::Other),
            (None, _) => None,
        }
    }
}

/// Accepts every event with a fixed category.
#[derive(Debug, Clone, Copy)]
pub struct AcceptAll(pub AssignmentCategory);

impl EventClassifier for AcceptAll {
    fn classify(&self, _event: &NormalizedCalendarEvent) -> Option<AssignmentCategory> {
        Some(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventStatus, ProviderKind};
    use chrono::{Duration, Utc};

    fn event(title: &str, description: Option<&str>) -> NormalizedCalendarEvent {
        let start = Utc::now();
        NormalizedCalendarEvent {
            id: "e1".into(),
            provider: ProviderKind::Memory,
            calendar_id: "primary".into(),
            title: title.into(),
            description: description.map(str::to_string),
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
    fn keywords_pick_categories() {
        let c = KeywordClassifier::default();
        assert_eq!(c.classify(&event("Physics Midterm", None)), Some(AssignmentCategory::Exam));
        assert_eq!(c.classify(&event("Weekly quiz #3", None)), Some(AssignmentCategory::Quiz));
        assert_eq!(
            c.classify(&event("Problem set 4", None)),
            Some(AssignmentCategory::Assignment)
        );
        assert_eq!(
            c.classify(&event("Study group", Some("Read chapter 5"))),
            Some(AssignmentCategory::Reading)
        );
    }

    #[test]
    fn matches_whole_words_only() {
        let c = KeywordClassifier::default();
        assert_eq!(c.classify(&event("Dinner with Alexa", None)), None);
        assert_eq!(c.classify(&event("Classical concert", None)), None);
        assert_eq!(c.classify(&event("Lab: circuits", None)), Some(AssignmentCategory::Lab));
    }

    #[test]
    fn first_rule_wins() {
        let c = KeywordClassifier::default();
        assert_eq!(
            c.classify(&event("Final project presentation", None)),
            Some(AssignmentCategory::Exam)
        );
    }

    #[test]
    fn course_code_alone_is_other() {
        let c = KeywordClassifier::empty();
        assert_eq!(c.classify(&event("MATH201: Office hours", None)), Some(AssignmentCategory::Other));
        assert_eq!(c.classify(&event("Office hours", None)), None);

        let c = c.with_rule(AssignmentCategory::Lecture, &["Office hours"]);
        assert_eq!(c.classify(&event("Office hours", None)), Some(AssignmentCategory::Lecture));
    }
}
