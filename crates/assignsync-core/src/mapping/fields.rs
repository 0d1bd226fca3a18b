//! Reminder and color conversions.

use serde_json::{json, Value};

use crate::model::{EventColor, ProviderKind, Reminder, ReminderMethod};

/// Google accepts at most five reminder overrides per event.
pub const GOOGLE_MAX_REMINDERS: usize = 5;

fn sorted_unique(reminders: &[Reminder]) -> Vec<Reminder> {
    let mut out = reminders.to_vec();
    out.sort();
    out.dedup();
    out
}

/// The subset of `reminders` a provider can store, in canonical order.
///
/// Comparing two reminder lists only makes sense after both went through
/// this projection.
pub fn project_reminders(provider: ProviderKind, reminders: &[Reminder]) -> Vec<Reminder> {
    match provider {
        ProviderKind::Google => {
            let mut out = sorted_unique(reminders);
            out.truncate(GOOGLE_MAX_REMINDERS);
            out
        }
        ProviderKind::Microsoft => graph_reminder_minutes(reminders)
            .map(|m| vec![Reminder::popup(m)])
            .unwrap_or_default(),
        ProviderKind::Memory => sorted_unique(reminders),
    }
}

/// Google `reminders` object.
pub fn to_google_reminders(reminders: &[Reminder]) -> Value {
    let overrides: Vec<Value> = project_reminders(ProviderKind::Google, reminders)
        .into_iter()
        .map(|r| {
            json!({
                "method": match r.method {
                    ReminderMethod::Popup => "popup",
                    ReminderMethod::Email => "email",
                },
                "minutes": r.minutes_before,
            })
        })
        .collect();
    json!({ "useDefault": false, "overrides": overrides })
}

/// Parse a Google `reminders` object. Calendar defaults (`useDefault`) are
/// not visible through the event and read as no reminders.
pub fn from_google_reminders(value: &Value) -> Vec<Reminder> {
    let Some(overrides) = value["overrides"].as_array() else {
        return Vec::new();
    };
    let parsed: Vec<Reminder> = overrides
        .iter()
        .filter_map(|o| {
            let minutes = u32::try_from(o["minutes"].as_u64()?).ok()?;
            match o["method"].as_str()? {
                "popup" => Some(Reminder::popup(minutes)),
                "email" => Some(Reminder::email(minutes)),
                _ => None,
            }
        })
        .collect();
    sorted_unique(&parsed)
}

/// Graph holds one reminder: the smallest popup, else the smallest of any kind.
pub fn graph_reminder_minutes(reminders: &[Reminder]) -> Option<u32> {
    reminders
        .iter()
        .filter(|r| r.method == ReminderMethod::Popup)
        .map(|r| r.minutes_before)
        .min()
        .or_else(|| reminders.iter().map(|r| r.minutes_before).min())
}

pub fn from_graph_reminder(is_reminder_on: bool, minutes: Option<u64>) -> Vec<Reminder> {
    match (is_reminder_on, minutes.and_then(|m| u32::try_from(m).ok())) {
        (true, Some(m)) => vec![Reminder::popup(m)],
        _ => Vec::new(),
    }
}

pub fn to_google_color_id(color: EventColor) -> &'static str {
    match color {
        EventColor::Purple => "3",
        EventColor::Yellow => "5",
        EventColor::Orange => "6",
        EventColor::Turquoise => "7",
        EventColor::Gray => "8",
        EventColor::Blue => "9",
        EventColor::Green => "10",
        EventColor::Red => "11",
    }
}

/// Google's palette has eleven ids; the ones without a counterpart fold
/// into the nearest color.
pub fn from_google_color_id(id: &str) -> Option<EventColor> {
    match id {
        "1" | "9" => Some(EventColor::Blue),
        "2" | "10" => Some(EventColor::Green),
        "3" => Some(EventColor::Purple),
        "4" | "11" => Some(EventColor::Red),
        "5" => Some(EventColor::Yellow),
        "6" => Some(EventColor::Orange),
        "7" => Some(EventColor::Turquoise),
        "8" => Some(EventColor::Gray),
        _ => None,
    }
}

const OUTLOOK_CATEGORIES: &[(EventColor, &str)] = &[
    (EventColor::Blue, "Blue category"),
    (EventColor::Green, "Green category"),
    (EventColor::Purple, "Purple category"),
    (EventColor::Red, "Red category"),
    (EventColor::Yellow, "Yellow category"),
    (EventColor::Orange, "Orange category"),
    (EventColor::Turquoise, "Turquoise category"),
    (EventColor::Gray, "Gray category"),
];

pub fn to_outlook_category(color: EventColor) -> &'static str {
    OUTLOOK_CATEGORIES
        .iter()
        .find(|(c, _)| *c == color)
        .map(|(_, name)| *name)
        .unwrap_or("Blue category")
}

/// First color category in a Graph `categories` array.
pub fn from_outlook_categories(categories: &[String]) -> Option<EventColor> {
    categories.iter().find_map(|cat| {
        OUTLOOK_CATEGORIES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(cat.trim()))
            .map(|(color, _)| *color)
    })
}

pub fn is_color_category(name: &str) -> bool {
    from_outlook_categories(&[name.to_string()]).is_some()
}
