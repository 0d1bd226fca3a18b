//! TOML-based application configuration.
//!
//! Stores user preferences including:
//! - Sync policy (direction, categories, conflict policy, window)
//! - Provider endpoints and OAuth callback ports
//!
//! Configuration is stored at `~/.config/assignsync/config.toml`.
//! OAuth client credentials live in the OS keyring, not here.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::ConfigError;
use crate::sync::SyncConfiguration;

/// Google Calendar adapter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleConfig {
    #[serde(default = "default_google_api_base")]
    pub api_base: String,
    #[serde(default = "default_google_port")]
    pub redirect_port: u16,
}

/// Microsoft Graph adapter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicrosoftConfig {
    #[serde(default = "default_graph_api_base")]
    pub api_base: String,
    /// Azure AD tenant; "common" accepts work and personal accounts.
    #[serde(default = "default_tenant")]
    pub tenant: String,
    #[serde(default = "default_microsoft_port")]
    pub redirect_port: u16,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/assignsync/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncConfiguration,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub microsoft: MicrosoftConfig,
}

fn default_google_api_base() -> String {
    "https://www.googleapis.com/calendar/v3".into()
}
fn default_google_port() -> u16 {
    19821
}
fn default_graph_api_base() -> String {
    "https://graph.microsoft.com/v1.0".into()
}
fn default_tenant() -> String {
    "common".into()
}
fn default_microsoft_port() -> u16 {
    19822
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            api_base: default_google_api_base(),
            redirect_port: default_google_port(),
        }
    }
}

impl Default for MicrosoftConfig {
    fn default() -> Self {
        Self {
            api_base: default_graph_api_base(),
            tenant: default_tenant(),
            redirect_port: default_microsoft_port(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_some() {
                current = current.get_mut(part).ok_or_else(unknown)?;
                continue;
            }

            let obj = current.as_object_mut().ok_or_else(unknown)?;
            let existing = obj.get(part).ok_or_else(unknown)?;

            let new_value = match existing {
                serde_json::Value::Bool(_) => serde_json::Value::Bool(
                    value
                        .parse::<bool>()
                        .map_err(|e| invalid(e.to_string()))?,
                ),
                serde_json::Value::Number(_) => {
                    if let Ok(n) = value.parse::<u64>() {
                        serde_json::Value::Number(n.into())
                    } else {
                        return Err(invalid(format!("cannot parse '{value}' as number")));
                    }
                }
                // Lists accept JSON or a comma-separated shorthand ("exam,quiz").
                serde_json::Value::Array(_) => match serde_json::from_str(value) {
                    Ok(v) => v,
                    Err(_) => serde_json::Value::Array(
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(|s| serde_json::Value::String(s.to_string()))
                            .collect(),
                    ),
                },
                serde_json::Value::Object(_) => {
                    serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                }
                _ => serde_json::Value::String(value.into()),
            };

            obj.insert(part.to_string(), new_value);
            return Ok(());
        }

        Err(unknown())
    }

    /// Path of the config file in the data directory.
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk, writing the default config if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                tracing::info!(path = %path.display(), "wrote default config");
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| save_failed(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by dot-separated key. The caller saves.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value does not fit the
    /// field (for example `sync.direction = sideways`).
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        updated
            .sync
            .window_at(chrono::Utc::now())
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        *self = updated;
        Ok(())
    }

    /// Flattened `key = value` pairs for every leaf, sorted by key.
    pub fn entries(&self) -> Vec<(String, String)> {
        fn walk(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
            match value {
                serde_json::Value::Object(map) => {
                    for (k, v) in map {
                        let key = if prefix.is_empty() {
                            k.clone()
                        } else {
                            format!("{prefix}.{k}")
                        };
                        walk(&key, v, out);
                    }
                }
                serde_json::Value::String(s) => out.push((prefix.to_string(), s.clone())),
                other => out.push((prefix.to_string(), other.to_string())),
            }
        }

        let mut out = Vec::new();
        if let Ok(json) = serde_json::to_value(self) {
            walk("", &json, &mut out);
        }
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AssignmentCategory;
    use crate::sync::{ConflictPolicy, SyncDirection};

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn empty_file_yields_defaults() {
        let parsed: Config = toml::from_str("").unwrap();
        assert_eq!(parsed.sync.window_past_days, 14);
        assert_eq!(parsed.google.redirect_port, 19821);
        assert_eq!(parsed.microsoft.tenant, "common");
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("sync.direction").as_deref(), Some("bidirectional"));
        assert_eq!(cfg.get("sync.window_future_days").as_deref(), Some("120"));
        assert!(cfg.get("sync.missing_key").is_none());
        assert!(cfg.get("").is_none());
    }

    #[test]
    fn set_updates_enum_number_and_bool() {
        let mut cfg = Config::default();
        cfg.set("sync.direction", "import").unwrap();
        cfg.set("sync.conflict_policy", "newest_wins").unwrap();
        cfg.set("sync.window_past_days", "3").unwrap();
        cfg.set("sync.sync_completed", "true").unwrap();

        assert_eq!(cfg.sync.direction, SyncDirection::Import);
        assert_eq!(cfg.sync.conflict_policy, ConflictPolicy::NewestWins);
        assert_eq!(cfg.sync.window_past_days, 3);
        assert!(cfg.sync.sync_completed);
    }

    #[test]
    fn set_accepts_comma_separated_categories() {
        let mut cfg = Config::default();
        cfg.set("sync.categories", "exam, lecture").unwrap();
        assert_eq!(
            cfg.sync.categories,
            vec![AssignmentCategory::Exam, AssignmentCategory::Lecture]
        );
    }

    #[test]
    fn set_rejects_unknown_key_and_bad_values() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.set("sync.nonexistent", "1"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            cfg.set("sync.sync_completed", "maybe"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            cfg.set("sync.direction", "sideways"),
            Err(ConfigError::InvalidValue { .. })
        ));
        // Failed sets leave the config untouched.
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn set_rejects_window_outside_date_range() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.set("sync.window_past_days", "4000000000"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(cfg.sync.window_past_days, 14);

        cfg.set("sync.window_past_days", "365").unwrap();
        assert_eq!(cfg.sync.window_past_days, 365);
    }

    #[test]
    fn load_from_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let cfg = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn save_then_load_preserves_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut cfg = Config::default();
        cfg.set("sync.calendar_id", "school@group.calendar.google.com")
            .unwrap();
        cfg.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.sync.calendar_id, "school@group.calendar.google.com");
    }

    #[test]
    fn unparseable_file_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "sync = 5").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::LoadFailed { .. })
        ));
    }

    #[test]
    fn entries_flatten_every_leaf() {
        let entries = Config::default().entries();
        assert!(entries
            .iter()
            .any(|(k, v)| k == "sync.calendar_id" && v == "primary"));
        assert!(entries.iter().any(|(k, _)| k == "microsoft.redirect_port"));
    }
}
