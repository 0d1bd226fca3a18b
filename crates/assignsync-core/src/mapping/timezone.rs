//! Timezone conversion helpers.
//!
//! Items carry an IANA zone name. Microsoft Graph reports Windows zone names
//! ("Pacific Standard Time"), which are normalized here before use.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::ValidationError;

/// Windows zone id -> IANA name, for the zones Graph commonly reports.
const WINDOWS_ZONES: &[(&str, &str)] = &[
    ("UTC", "UTC"),
    ("Coordinated Universal Time", "UTC"),
    ("GMT Standard Time", "Europe/London"),
    ("Greenwich Standard Time", "Atlantic/Reykjavik"),
    ("W. Europe Standard Time", "Europe/Berlin"),
    ("Central Europe Standard Time", "Europe/Budapest"),
    ("Central European Standard Time", "Europe/Warsaw"),
    ("Romance Standard Time", "Europe/Paris"),
    ("E. Europe Standard Time", "Europe/Chisinau"),
    ("FLE Standard Time", "Europe/Kiev"),
    ("GTB Standard Time", "Europe/Bucharest"),
    ("Russian Standard Time", "Europe/Moscow"),
    ("Turkey Standard Time", "Europe/Istanbul"),
    ("Israel Standard Time", "Asia/Jerusalem"),
    ("South Africa Standard Time", "Africa/Johannesburg"),
    ("Egypt Standard Time", "Africa/Cairo"),
    ("Arabian Standard Time", "Asia/Dubai"),
    ("India Standard Time", "Asia/Kolkata"),
    ("SE Asia Standard Time", "Asia/Bangkok"),
    ("China Standard Time", "Asia/Shanghai"),
    ("Singapore Standard Time", "Asia/Singapore"),
    ("Taipei Standard Time", "Asia/Taipei"),
    ("Tokyo Standard Time", "Asia/Tokyo"),
    ("Korea Standard Time", "Asia/Seoul"),
    ("AUS Eastern Standard Time", "Australia/Sydney"),
    ("E. Australia Standard Time", "Australia/Brisbane"),
    ("Cen. Australia Standard Time", "Australia/Adelaide"),
    ("W. Australia Standard Time", "Australia/Perth"),
    ("New Zealand Standard Time", "Pacific/Auckland"),
    ("Hawaiian Standard Time", "Pacific/Honolulu"),
    ("Alaskan Standard Time", "America/Anchorage"),
    ("Pacific Standard Time", "America/Los_Angeles"),
    ("US Mountain Standard Time", "America/Phoenix"),
    ("Mountain Standard Time", "America/Denver"),
    ("Central Standard Time", "America/Chicago"),
    ("Central America Standard Time", "America/Guatemala"),
    ("Canada Central Standard Time", "America/Regina"),
    ("Mexico Standard Time", "America/Mexico_City"),
    ("Central Standard Time (Mexico)", "America/Mexico_City"),
    ("Eastern Standard Time", "America/New_York"),
    ("US Eastern Standard Time", "America/Indianapolis"),
    ("Atlantic Standard Time", "America/Halifax"),
    ("Newfoundland Standard Time", "America/St_Johns"),
    ("SA Pacific Standard Time", "America/Bogota"),
    ("Pacific SA Standard Time", "America/Santiago"),
    ("E. South America Standard Time", "America/Sao_Paulo"),
    ("Argentina Standard Time", "America/Buenos_Aires"),
];

/// Parse an IANA zone name.
pub fn parse_timezone(name: &str) -> Result<Tz, ValidationError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| ValidationError::UnknownTimezone(name.to_string()))
}

pub fn validate_timezone(name: &str) -> Result<(), ValidationError> {
    parse_timezone(name).map(|_| ())
}

/// Map a provider zone name to IANA. Accepts IANA names as-is and
/// Windows zone ids; returns `None` for anything else.
pub fn normalize_timezone(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(tz) = trimmed.parse::<Tz>() {
        return Some(tz.name().to_string());
    }
    WINDOWS_ZONES
        .iter()
        .find(|(windows, _)| windows.eq_ignore_ascii_case(trimmed))
        .map(|(_, iana)| (*iana).to_string())
}

/// Like [`normalize_timezone`] but falls back to UTC, logging the unknown name.
pub fn normalize_or_utc(name: &str) -> String {
    normalize_timezone(name).unwrap_or_else(|| {
        tracing::warn!(timezone = name, "unknown timezone, using UTC");
        "UTC".to_string()
    })
}

/// Wall-clock time of `ts` in `tz`.
pub fn to_local(ts: DateTime<Utc>, tz: &str) -> Result<NaiveDateTime, ValidationError> {
    Ok(ts.with_timezone(&parse_timezone(tz)?).naive_local())
}

/// `ts` rendered as `YYYY-MM-DDTHH:MM:SS` in `tz` (the shape both providers
/// accept alongside a separate zone field).
pub fn format_local(ts: DateTime<Utc>, tz: &str) -> Result<String, ValidationError> {
    Ok(to_local(ts, tz)?.format("%Y-%m-%dT%H:%M:%S").to_string())
}

/// Resolve a wall-clock time in `tz` to UTC.
///
/// Ambiguous times (DST fall-back) take the earlier instant; times inside a
/// DST gap are shifted forward by one hour.
pub fn from_local(naive: NaiveDateTime, tz: &str) -> Result<DateTime<Utc>, ValidationError> {
    let zone = parse_timezone(tz)?;
    zone.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            zone.from_local_datetime(&(naive + Duration::hours(1)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| ValidationError::InvalidValue {
            field: "start".into(),
            message: format!("{naive} does not exist in {tz}"),
        })
}

/// Calendar date of `ts` in `tz`.
pub fn local_date(ts: DateTime<Utc>, tz: &str) -> Result<NaiveDate, ValidationError> {
    Ok(to_local(ts, tz)?.date())
}

/// UTC midnight of `date`; the storage form of all-day boundaries.
pub fn date_start_utc(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}

/// `[start, end)` dates of an all-day range stored as UTC midnights.
/// The end is exclusive and at least one day after the start.
pub fn all_day_dates(start: DateTime<Utc>, end: DateTime<Utc>) -> (NaiveDate, NaiveDate) {
    let first = start.date_naive();
    let last = end.date_naive().max(first + Duration::days(1));
    (first, last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_iana_names() {
        assert!(validate_timezone("America/New_York").is_ok());
        assert!(validate_timezone("UTC").is_ok());
        assert!(matches!(
            validate_timezone("Mars/Olympus"),
            Err(ValidationError::UnknownTimezone(_))
        ));
    }

    #[test]
    fn normalizes_windows_names() {
        assert_eq!(
            normalize_timezone("Pacific Standard Time").as_deref(),
            Some("America/Los_Angeles")
        );
        assert_eq!(
            normalize_timezone("tokyo standard time").as_deref(),
            Some("Asia/Tokyo")
        );
        assert_eq!(
            normalize_timezone("Europe/Paris").as_deref(),
            Some("Europe/Paris")
        );
        assert_eq!(normalize_timezone("Nowhere Time"), None);
        assert_eq!(normalize_or_utc(""), "UTC");
    }

    #[test]
    fn every_windows_mapping_is_valid_iana() {
        for (_, iana) in WINDOWS_ZONES {
            assert!(validate_timezone(iana).is_ok(), "{iana}");
        }
    }

    #[test]
    fn local_rendering() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 15, 17, 30, 0).unwrap();
        assert_eq!(
            format_local(ts, "America/New_York").unwrap(),
            "2025-01-15T12:30:00"
        );
        assert_eq!(
            local_date(Utc.with_ymd_and_hms(2025, 1, 15, 2, 0, 0).unwrap(), "America/New_York")
                .unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 14).unwrap()
        );
    }

    #[test]
    fn from_local_handles_dst_edges() {
        // 2025-03-09 02:30 does not exist in New York.
        let gap = NaiveDate::from_ymd_opt(2025, 3, 9)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap();
        let resolved = from_local(gap, "America/New_York").unwrap();
        assert_eq!(resolved, Utc.with_ymd_and_hms(2025, 3, 9, 7, 30, 0).unwrap());

        // 2025-11-02 01:30 happens twice; the earlier (EDT) instant wins.
        let ambiguous = NaiveDate::from_ymd_opt(2025, 11, 2)
            .unwrap()
            .and_hms_opt(1, 30, 0)
            .unwrap();
        let resolved = from_local(ambiguous, "America/New_York").unwrap();
        assert_eq!(resolved, Utc.with_ymd_and_hms(2025, 11, 2, 5, 30, 0).unwrap());
    }

    #[test]
    fn all_day_end_is_exclusive() {
        let day = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
        let start = date_start_utc(day);
        let (first, last) = all_day_dates(start, start);
        assert_eq!(first, day);
        assert_eq!(last, NaiveDate::from_ymd_opt(2025, 5, 2).unwrap());
    }
}
