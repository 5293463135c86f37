//! Operator-facing tick journal
//!
//! Plain text, one `YYYY-MM-DD HH:MM:SS - message` line per event (UTC).
//! Backs the `log N` command.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const SEPARATOR: &str = " - ";

/// Marks outgoing chat messages; these are excluded from `recent`
const SENT_PREFIX: &str = "sent: ";

/// Longest excerpt of an outgoing message kept in the journal
const SENT_EXCERPT_CHARS: usize = 120;

/// Append-only journal shared between the scheduler and the command channel
#[derive(Clone)]
pub struct TickJournal {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl TickJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line stamped with the current time
    pub async fn append(&self, message: &str) -> Result<()> {
        self.append_at(Utc::now(), message).await
    }

    pub async fn append_at(&self, at: DateTime<Utc>, message: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        // Multi-line messages would break the line format
        let line = format!(
            "{}{}{}\n",
            at.format(TIMESTAMP_FORMAT),
            SEPARATOR,
            message.replace('\n', " | ")
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open journal {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to append to journal {}", self.path.display()))?;
        Ok(())
    }

    /// Record an outgoing chat message (first line only, shortened)
    pub async fn append_sent(&self, text: &str) -> Result<()> {
        let first_line = text.lines().next().unwrap_or_default();
        let mut excerpt: String = first_line.chars().take(SENT_EXCERPT_CHARS).collect();
        if excerpt.len() < text.len() {
            excerpt.push_str("...");
        }
        self.append(&format!("{}{}", SENT_PREFIX, excerpt)).await
    }

    /// Event lines from the last `days` days, joined with newlines.
    ///
    /// Outgoing chat messages are left out, so a `log` reply never contains
    /// earlier `log` replies.
    pub fn recent(&self, days: u32, now: DateTime<Utc>) -> String {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return "No logs found.".to_string(),
            Err(e) => return format!("Cannot read logs: {}", e),
        };

        // Windows reaching past chrono's range mean "everything"
        let cutoff = now
            .checked_sub_signed(Duration::days(days as i64))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let lines: Vec<&str> = data
            .lines()
            .filter(|line| match parse_line(line) {
                Some((ts, message)) => ts >= cutoff && !message.starts_with(SENT_PREFIX),
                None => false,
            })
            .collect();

        if lines.is_empty() {
            "No recent logs.".to_string()
        } else {
            lines.join("\n")
        }
    }
}

fn parse_line(line: &str) -> Option<(DateTime<Utc>, &str)> {
    let (ts, message) = line.split_once(SEPARATOR)?;
    let ts = NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).ok()?.and_utc();
    Some((ts, message))
}
