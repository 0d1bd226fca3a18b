//! Subcommand handlers and the state they share.

pub mod assignment;
pub mod auth;
pub mod config;
pub mod conflict;
pub mod mapping;
pub mod sync;

use std::error::Error;
use std::sync::Arc;

use assignsync_core::mapping::timezone;
use assignsync_core::provider::{self, KeyringTokenStore};
use assignsync_core::storage::data_dir;
use assignsync_core::{
    AssignmentCalendarSyncService, AssignmentCategory, CalendarProvider, Config, SyncDb,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

pub type CmdResult = Result<(), Box<dyn Error>>;

/// Config, database and the configured calendar, opened together.
pub struct Context {
    pub config: Config,
    pub db: SyncDb,
    pub provider: Arc<dyn CalendarProvider>,
}

impl Context {
    pub fn open() -> Result<Self, Box<dyn Error>> {
        let config = Config::load()?;
        let db = SyncDb::open()?;
        let provider = provider::connect(&config, Arc::new(KeyringTokenStore), &data_dir()?)?;
        Ok(Self {
            config,
            db,
            provider,
        })
    }

    pub fn service(&self) -> AssignmentCalendarSyncService<'_> {
        AssignmentCalendarSyncService::new(
            &self.db,
            self.provider.as_ref(),
            self.config.sync.clone(),
        )
    }
}

pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> CmdResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn parse_category(raw: &str) -> Result<AssignmentCategory, String> {
    AssignmentCategory::parse(raw).ok_or_else(|| {
        let names: Vec<_> = AssignmentCategory::ALL.iter().map(|c| c.as_str()).collect();
        format!("unknown category '{raw}' (expected one of: {})", names.join(", "))
    })
}

/// RFC 3339, a wall-clock time in `tz`, or a bare date. The flag is true for
/// a bare date.
pub fn parse_time(raw: &str, tz: &str) -> Result<(DateTime<Utc>, bool), Box<dyn Error>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok((dt.with_timezone(&Utc), false));
    }
    for fmt in ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok((timezone::from_local(naive, tz)?, false));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok((timezone::date_start_utc(date), true));
    }
    Err(format!("cannot parse time '{raw}' (use YYYY-MM-DD, 'YYYY-MM-DD HH:MM' or RFC 3339)").into())
}
