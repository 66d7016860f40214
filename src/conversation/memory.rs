//! Per-session conversation memory stored as JSONL files

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Who said it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One remembered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub role: Role,
    pub content: String,
    pub language: String,
    pub timestamp: DateTime<Utc>,
}

impl MemoryEntry {
    /// Entry stamped with the current time
    #[must_use]
    pub fn now(role: Role, content: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            language: language.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only session files, trimmed to the newest `max_turns` entries
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
    max_turns: usize,
}

impl SessionStore {
    /// Store rooted at `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, max_turns: usize) -> Self {
        Self {
            dir: dir.into(),
            max_turns: max_turns.max(1),
        }
    }

    /// Directory holding the session files
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `session_id`
    ///
    /// # Errors
    ///
    /// Returns error if the id has no usable characters
    pub fn path(&self, session_id: &str) -> Result<PathBuf> {
        let name: String = session_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();

        if name.is_empty() {
            return Err(Error::Memory(format!("invalid session id {session_id:?}")));
        }
        Ok(self.dir.join(format!("{name}.jsonl")))
    }

    /// All retained entries for a session, oldest first
    ///
    /// Unreadable lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read
    pub fn load(&self, session_id: &str) -> Result<Vec<MemoryEntry>> {
        let path = self.path(session_id)?;
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(fs::File::open(&path)?);
        let mut entries = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MemoryEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping bad memory line");
                }
            }
        }

        Ok(entries)
    }

    /// Append an entry, trimming the file once it holds more than `max_turns`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn append(&self, session_id: &str, entry: &MemoryEntry) -> Result<()> {
        let path = self.path(session_id)?;
        fs::create_dir_all(&self.dir)?;

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(line.as_bytes())?;
        drop(file);

        let entries = self.load(session_id)?;
        if entries.len() > self.max_turns {
            let keep = &entries[entries.len() - self.max_turns..];
            self.rewrite(&path, keep)?;
            tracing::debug!(session = session_id, kept = keep.len(), "trimmed session memory");
        }

        Ok(())
    }

    /// Forget a session
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be removed
    pub fn clear(&self, session_id: &str) -> Result<()> {
        let path = self.path(session_id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn rewrite(&self, path: &Path, entries: &[MemoryEntry]) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        for entry in entries {
            serde_json::to_writer(&mut tmp, entry)?;
            tmp.write_all(b"\n")?;
        }
        tmp.persist(path)
            .map_err(|e| Error::Memory(format!("failed to replace {}: {e}", path.display())))?;
        Ok(())
    }
}
