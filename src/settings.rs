//! User settings, shared by handle instead of through global state.
//!
//! Readers take a [`SettingsStore::snapshot`] or [`SettingsStore::subscribe`]
//! for changes. [`SettingsStore::update`] persists first and only then
//! notifies, so subscribers never see a value that was not saved.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundTheme {
    #[default]
    Plain,
    Paper,
    Dusk,
    Forest,
}

impl BackgroundTheme {
    pub const ALL: [Self; 4] = [Self::Plain, Self::Paper, Self::Dusk, Self::Forest];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Paper => "paper",
            Self::Dusk => "dusk",
            Self::Forest => "forest",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for BackgroundTheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub theme: BackgroundTheme,
    pub debug_logging: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to write settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub struct SettingsStore {
    path: Option<PathBuf>,
    tx: watch::Sender<Settings>,
}

impl SettingsStore {
    /// Load from `path`; a missing or unreadable file yields defaults.
    pub fn open(path: &Path) -> Self {
        let settings = load_settings(path);
        Self {
            path: Some(path.to_path_buf()),
            tx: watch::Sender::new(settings),
        }
    }

    /// A store that never touches disk.
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            path: None,
            tx: watch::Sender::new(settings),
        }
    }

    pub fn snapshot(&self) -> Settings {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    /// Apply `f` to a copy of the current settings, save it, then publish it.
    pub fn update(&self, f: impl FnOnce(&mut Settings)) -> Result<Settings, SettingsError> {
        let mut next = self.snapshot();
        f(&mut next);
        if let Some(path) = &self.path {
            save_settings(path, &next)?;
        }
        self.tx.send_replace(next.clone());
        Ok(next)
    }
}

fn load_settings(path: &Path) -> Settings {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("Ignoring unreadable settings {}: {}", path.display(), e);
            Settings::default()
        }),
        Err(_) => Settings::default(),
    }
}

fn save_settings(path: &Path, settings: &Settings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}
