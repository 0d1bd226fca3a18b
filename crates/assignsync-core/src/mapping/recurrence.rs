//! Recurrence conversion.
//!
//! [`RecurrenceRule`] <-> RFC 5545 `RRULE:` line (Google) <-> Graph
//! `patternedRecurrence` JSON (Microsoft). Only FREQ, INTERVAL, BYDAY (plain
//! weekdays), COUNT and UNTIL are supported.

use chrono::{Datelike, NaiveDate, Weekday};
use serde_json::{json, Value};

use crate::error::ValidationError;
use crate::model::{Frequency, RecurrenceRule};

fn invalid(rule: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidRecurrence {
        rule: rule.to_string(),
        message: message.into(),
    }
}

fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

fn weekday_from_code(code: &str) -> Option<Weekday> {
    match code {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}

fn weekday_graph_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

fn weekday_from_graph_name(name: &str) -> Option<Weekday> {
    match name.to_ascii_lowercase().as_str() {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Canonical form used for comparison: normalized, and weekly rules without
/// `by_day` get the start weekday (what both providers infer).
pub fn canonical(rule: &RecurrenceRule, start_weekday: Weekday) -> RecurrenceRule {
    let mut rule = rule.normalized();
    if rule.frequency == Frequency::Weekly && rule.by_day.is_empty() {
        rule.by_day.push(start_weekday);
    }
    rule
}

/// Render as a single `RRULE:` line.
pub fn to_rrule(rule: &RecurrenceRule) -> String {
    let rule = rule.normalized();
    let freq = match rule.frequency {
        Frequency::Daily => "DAILY",
        Frequency::Weekly => "WEEKLY",
        Frequency::Monthly => "MONTHLY",
        Frequency::Yearly => "YEARLY",
    };
    let mut parts = vec![format!("FREQ={freq}")];
    if rule.interval > 1 {
        parts.push(format!("INTERVAL={}", rule.interval));
    }
    if !rule.by_day.is_empty() {
        let days: Vec<&str> = rule.by_day.iter().map(|d| weekday_code(*d)).collect();
        parts.push(format!("BYDAY={}", days.join(",")));
    }
    if let Some(count) = rule.count {
        parts.push(format!("COUNT={count}"));
    }
    if let Some(until) = rule.until {
        parts.push(format!("UNTIL={}T235959Z", until.format("%Y%m%d")));
    }
    format!("RRULE:{}", parts.join(";"))
}

/// Parse an `RRULE` line; the `RRULE:` prefix is optional.
pub fn parse_rrule(line: &str) -> Result<RecurrenceRule, ValidationError> {
    let body = line.trim();
    let body = body.strip_prefix("RRULE:").unwrap_or(body);

    let mut frequency = None;
    let mut rule = RecurrenceRule::new(Frequency::Daily);

    for part in body.split(';').filter(|p| !p.is_empty()) {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| invalid(line, format!("malformed part '{part}'")))?;
        match key.to_ascii_uppercase().as_str() {
            "FREQ" => {
                frequency = Some(match value.to_ascii_uppercase().as_str() {
                    "DAILY" => Frequency::Daily,
                    "WEEKLY" => Frequency::Weekly,
                    "MONTHLY" => Frequency::Monthly,
                    "YEARLY" => Frequency::Yearly,
                    other => return Err(invalid(line, format!("unsupported FREQ '{other}'"))),
                });
            }
            "INTERVAL" => {
                rule.interval = value
                    .parse()
                    .map_err(|_| invalid(line, format!("bad INTERVAL '{value}'")))?;
            }
            "BYDAY" => {
                rule.by_day = value
                    .split(',')
                    .map(|code| {
                        weekday_from_code(&code.trim().to_ascii_uppercase())
                            .ok_or_else(|| invalid(line, format!("unsupported BYDAY '{code}'")))
                    })
                    .collect::<Result<_, _>>()?;
            }
            "COUNT" => {
                rule.count = Some(
                    value
                        .parse()
                        .map_err(|_| invalid(line, format!("bad COUNT '{value}'")))?,
                );
            }
            "UNTIL" => {
                let date = value.get(..8).unwrap_or(value);
                rule.until = Some(
                    NaiveDate::parse_from_str(date, "%Y%m%d")
                        .map_err(|_| invalid(line, format!("bad UNTIL '{value}'")))?,
                );
            }
            // WKST and friends do not change the occurrences we support.
            "WKST" => {}
            other => return Err(invalid(line, format!("unsupported part '{other}'"))),
        }
    }

    rule.frequency = frequency.ok_or_else(|| invalid(line, "missing FREQ"))?;
    Ok(rule.normalized())
}

/// First `RRULE` in a Google `recurrence` array. EXDATE/RDATE lines are ignored.
pub fn from_google_recurrence(lines: &[String]) -> Result<Option<RecurrenceRule>, ValidationError> {
    lines
        .iter()
        .find(|l| l.trim_start().starts_with("RRULE:"))
        .map(|l| parse_rrule(l))
        .transpose()
}

/// Graph `patternedRecurrence` for a series starting on `start` in `timezone`.
pub fn to_graph_recurrence(rule: &RecurrenceRule, start: NaiveDate, timezone: &str) -> Value {
    let rule = canonical(rule, start.weekday());
    let mut pattern = json!({
        "interval": rule.interval,
    });
    match rule.frequency {
        Frequency::Daily => {
            pattern["type"] = json!("daily");
        }
        Frequency::Weekly => {
            pattern["type"] = json!("weekly");
            pattern["daysOfWeek"] = json!(rule
                .by_day
                .iter()
                .map(|d| weekday_graph_name(*d))
                .collect::<Vec<_>>());
            pattern["firstDayOfWeek"] = json!("sunday");
        }
        Frequency::Monthly => {
            pattern["type"] = json!("absoluteMonthly");
            pattern["dayOfMonth"] = json!(start.day());
        }
        Frequency::Yearly => {
            pattern["type"] = json!("absoluteYearly");
            pattern["dayOfMonth"] = json!(start.day());
            pattern["month"] = json!(start.month());
        }
    }

    let start_date = start.format("%Y-%m-%d").to_string();
    let range = match (rule.count, rule.until) {
        (Some(count), _) => json!({
            "type": "numbered",
            "startDate": start_date,
            "numberOfOccurrences": count,
            "recurrenceTimeZone": timezone,
        }),
        (None, Some(until)) => json!({
            "type": "endDate",
            "startDate": start_date,
            "endDate": until.format("%Y-%m-%d").to_string(),
            "recurrenceTimeZone": timezone,
        }),
        (None, None) => json!({
            "type": "noEnd",
            "startDate": start_date,
            "recurrenceTimeZone": timezone,
        }),
    };

    json!({ "pattern": pattern, "range": range })
}

/// Parse a Graph `patternedRecurrence`. `null` means no recurrence.
pub fn from_graph_recurrence(value: &Value) -> Result<Option<RecurrenceRule>, ValidationError> {
    if value.is_null() {
        return Ok(None);
    }
    let raw = value.to_string();
    let pattern = &value["pattern"];
    let range = &value["range"];

    let kind = pattern["type"].as_str().unwrap_or_default();
    let frequency = match kind {
        "daily" => Frequency::Daily,
        "weekly" => Frequency::Weekly,
        "absoluteMonthly" => Frequency::Monthly,
        "absoluteYearly" => Frequency::Yearly,
        other => return Err(invalid(&raw, format!("unsupported pattern '{other}'"))),
    };

    let mut rule = RecurrenceRule::new(frequency);
    rule.interval = pattern["interval"]
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(1);
    if frequency == Frequency::Weekly {
        rule.by_day = pattern["daysOfWeek"]
            .as_array()
            .map(|days| {
                days.iter()
                    .filter_map(|d| d.as_str().and_then(weekday_from_graph_name))
                    .collect()
            })
            .unwrap_or_default();
    }

    match range["type"].as_str().unwrap_or("noEnd") {
        "numbered" => {
            rule.count = range["numberOfOccurrences"]
                .as_u64()
                .and_then(|n| u32::try_from(n).ok());
        }
        "endDate" => {
            let end = range["endDate"].as_str().unwrap_or_default();
            rule.until = Some(
                NaiveDate::parse_from_str(end, "%Y-%m-%d")
                    .map_err(|_| invalid(&raw, format!("bad endDate '{end}'")))?,
            );
        }
        _ => {}
    }

    Ok(Some(rule.normalized()))
}
