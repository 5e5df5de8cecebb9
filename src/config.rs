use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::reminder::{NotificationChannel, ReminderZone};
use crate::reminder::delivery::DEFAULT_TITLE;

pub const CONFIG_VERSION: u64 = 1;
const APP_DIR: &str = "nudge";

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join(APP_DIR)
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

fn default_true() -> bool {
    true
}

fn default_version() -> u64 {
    CONFIG_VERSION
}

fn default_rescan_secs() -> u64 {
    60
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write config: {0}")]
    Write(#[from] std::io::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NudgeConfig {
    #[serde(default = "default_version")]
    pub version: u64,
    #[serde(default = "default_data_dir")]
    pub data_directory: PathBuf,
    #[serde(default)]
    pub notification_channel: NotificationChannel,
    #[serde(default = "default_title")]
    pub default_reminder_title: String,
    /// Whether exact wake-up timers are allowed.
    #[serde(default = "default_true")]
    pub exact_alarms: bool,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    /// Fixed zone offset for reminder times; the system zone when unset.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
    /// How often the daemon re-reads the store to pick up edits.
    #[serde(default = "default_rescan_secs")]
    pub rescan_secs: u64,
}

impl Default for NudgeConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            data_directory: default_data_dir(),
            notification_channel: NotificationChannel::default(),
            default_reminder_title: default_title(),
            exact_alarms: true,
            notifications_enabled: true,
            utc_offset_minutes: None,
            rescan_secs: default_rescan_secs(),
        }
    }
}

impl NudgeConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join(APP_DIR)
            .join("config.json")
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Missing file means defaults; an unreadable one is logged and ignored.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_directory.join("tasks.db")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_directory.join("settings.json")
    }

    pub fn zone(&self) -> ReminderZone {
        ReminderZone::from_offset_minutes(self.utc_offset_minutes)
    }

    /// Ensure the data directory exists.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "exact_alarms": false, "utc_offset_minutes": 60 }"#).unwrap();

        let config = NudgeConfig::load(&path).unwrap();
        assert!(!config.exact_alarms);
        assert!(config.notifications_enabled);
        assert_eq!(config.default_reminder_title, "Reminder");
        assert_eq!(config.notification_channel, NotificationChannel::default());
        assert!(matches!(config.zone(), ReminderZone::Fixed(_)));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = NudgeConfig {
            data_directory: dir.path().join("data"),
            rescan_secs: 5,
            ..NudgeConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(NudgeConfig::load(&path).unwrap(), config);
        assert_eq!(config.database_path(), dir.path().join("data").join("tasks.db"));
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(NudgeConfig::load(&path), Err(ConfigError::Parse { .. })));
        assert_eq!(NudgeConfig::load_or_default(&path), NudgeConfig::default());
    }
}
