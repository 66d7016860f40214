//! Persisted toy settings and the session id

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Chosen language and the child's name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
}

/// Files under the toy's data directory
#[derive(Debug, Clone)]
pub struct SettingsStore {
    dir: PathBuf,
}

impl SettingsStore {
    /// Store rooted at `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn settings_path(&self) -> PathBuf {
        self.dir.join("settings.json")
    }

    fn session_path(&self) -> PathBuf {
        self.dir.join("session_id.txt")
    }

    /// Load settings; a missing or unreadable file yields defaults
    #[must_use]
    pub fn load(&self) -> Settings {
        let path = self.settings_path();
        let Ok(content) = fs::read_to_string(&path) else {
            return Settings::default();
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable settings");
            Settings::default()
        })
    }

    /// Save settings
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save(&self, settings: &Settings) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.settings_path(), serde_json::to_string_pretty(settings)?)?;
        Ok(())
    }

    /// Persistent session id, created on first use
    ///
    /// # Errors
    ///
    /// Returns error if a new id cannot be written
    pub fn session_id(&self) -> Result<String> {
        if let Some(id) = read_trimmed(&self.session_path()) {
            return Ok(id);
        }
        self.new_session()
    }

    /// Replace the session id with a fresh one
    ///
    /// # Errors
    ///
    /// Returns error if the id cannot be written
    pub fn new_session(&self) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.save_session(&id)?;
        tracing::info!(session = %id, "started new session");
        Ok(id)
    }

    /// Store `id` as the persistent session id
    ///
    /// # Errors
    ///
    /// Returns error if the id cannot be written
    pub fn save_session(&self, id: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.session_path(), id)?;
        Ok(())
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let trimmed = content.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
