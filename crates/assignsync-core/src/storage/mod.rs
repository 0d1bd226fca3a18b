mod assignments;
mod config;
mod conflicts;
pub mod database;
mod history;
mod mappings;
pub mod migrations;

pub use config::{Config, GoogleConfig, MicrosoftConfig};
pub use database::SyncDb;

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/assignsync[-dev]/` based on ASSIGNSYNC_ENV.
///
/// Set ASSIGNSYNC_ENV=dev to use the development data directory.
///
/// # Errors
/// Returns an error if the home directory cannot be determined or if
/// creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .ok_or(ConfigError::NoDataDir)?
        .join(".config");

    let env = std::env::var("ASSIGNSYNC_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("assignsync-dev")
    } else {
        base_dir.join("assignsync")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::SaveFailed {
        path: dir.clone(),
        message: e.to_string(),
    })?;
    Ok(dir)
}

/// RFC 3339 with fixed nanosecond precision: lossless, and sorts lexically.
pub(crate) fn format_ts(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

pub(crate) fn parse_ts(
    table: &'static str,
    raw: &str,
) -> Result<chrono::DateTime<chrono::Utc>, crate::error::DatabaseError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| crate::error::DatabaseError::CorruptRow {
            table,
            message: format!("bad timestamp '{raw}': {e}"),
        })
}

pub(crate) fn parse_opt_ts(
    table: &'static str,
    raw: Option<String>,
) -> Result<Option<chrono::DateTime<chrono::Utc>>, crate::error::DatabaseError> {
    raw.map(|s| parse_ts(table, &s)).transpose()
}
