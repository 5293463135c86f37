//! Last-action record persisted as a small JSON file
//!
//! The file holds a single record and is always replaced whole (temp file,
//! fsync, rename), so a concurrent reader sees either the previous or the
//! new record, never a partial write.

use crate::error::{BotError, BotResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// The persisted record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastActionRecord {
    #[serde(
        rename = "lastActionTimestamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_action_at: Option<DateTime<Utc>>,
}

/// Cooldown gate backed by the last-action file
pub struct StateStore {
    path: PathBuf,
    cooldown: Duration,
    record: LastActionRecord,
}

impl StateStore {
    /// Open the store, loading an existing record if present.
    ///
    /// A missing file means no action has been taken yet. A file that exists
    /// but cannot be parsed is an error: silently forgetting the last action
    /// could double-trade inside the cooldown window.
    pub fn open(path: impl Into<PathBuf>, cooldown: Duration) -> BotResult<Self> {
        let path = path.into();
        let record = Self::read_record(&path)?;

        match record.last_action_at {
            Some(at) => info!("[State] Last action at {} ({})", at.to_rfc3339(), path.display()),
            None => info!("[State] No previous action recorded ({})", path.display()),
        }

        Ok(Self { path, cooldown, record })
    }

    /// Read the record without taking ownership of the file (status queries)
    pub fn read_record(path: &Path) -> BotResult<LastActionRecord> {
        match fs::read_to_string(path) {
            Ok(data) if data.trim().is_empty() => Ok(LastActionRecord::default()),
            Ok(data) => serde_json::from_str(&data).map_err(|e| {
                BotError::InvalidInput(format!("Corrupt state file {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(LastActionRecord::default()),
            Err(e) => Err(BotError::InvalidInput(format!(
                "Cannot read state file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn record(&self) -> LastActionRecord {
        self.record
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// True when no action was recorded or the cooldown has fully elapsed
    pub fn can_act_now(&self, now: DateTime<Utc>) -> bool {
        match self.record.last_action_at {
            None => true,
            Some(last) => now - last >= self.cooldown,
        }
    }

    /// When the next action becomes allowed, None if allowed already
    pub fn next_allowed_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.record
            .last_action_at
            .map(|last| last + self.cooldown)
            .filter(|at| *at > now)
    }

    /// Record a trade at `now` and persist it.
    ///
    /// The in-memory record is updated before the write, so a persistence
    /// failure never re-opens the cooldown for the running process.
    pub fn record_action(&mut self, now: DateTime<Utc>) -> BotResult<()> {
        self.record.last_action_at = Some(now);
        self.persist()
    }

    fn persist(&self) -> BotResult<()> {
        let json = serde_json::to_string_pretty(&self.record)
            .map_err(|e| BotError::Persistence(format!("Failed to encode state: {}", e)))?;

        let tmp_path = self.path.with_extension("json.tmp");
        write_synced(&tmp_path, json.as_bytes()).map_err(|e| {
            BotError::Persistence(format!("Failed to write {}: {}", tmp_path.display(), e))
        })?;

        fs::rename(&tmp_path, &self.path).map_err(|e| {
            BotError::Persistence(format!(
                "Failed to replace {} with {}: {}",
                self.path.display(),
                tmp_path.display(),
                e
            ))
        })?;

        debug!("[State] Persisted {}", self.path.display());
        Ok(())
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
