//! Session history log.
//!
//! Appends one plain-text record per session to a flat file:
//!
//! ```text
//! Timestamp: 10/17/2026, 3:04:05 PM
//! <summary paragraph>
//!
//! ```
//!
//! The file is append-only; reading it back is used for parent-facing stats.

use std::collections::BTreeSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::HistoryError;
use crate::summary::SummaryGenerator;
use crate::transcript::Transcript;

const TIMESTAMP_PREFIX: &str = "Timestamp: ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub summary: String,
}

impl HistoryEntry {
    /// Entry stamped with the current local time in US locale style.
    pub fn now(summary: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now().format("%-m/%-d/%Y, %-I:%M:%S %p").to_string(),
            summary: summary.into(),
        }
    }

    pub fn to_log_text(&self) -> String {
        format!("{TIMESTAMP_PREFIX}{}\n{}\n\n", self.timestamp, self.summary)
    }

    /// Date part of the timestamp (`M/D/YYYY`).
    pub fn date(&self) -> &str {
        self.timestamp
            .split([',', ' '])
            .next()
            .unwrap_or(&self.timestamp)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryStats {
    pub sessions: usize,
    pub active_days: usize,
    pub recent: Vec<HistoryEntry>,
}

pub struct HistoryLogger {
    path: PathBuf,
}

impl HistoryLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Summarize the transcript remotely and append the result to the log.
    pub async fn append_session_record(
        &self,
        summaries: &SummaryGenerator,
        transcript: &Transcript,
    ) -> Result<HistoryEntry, HistoryError> {
        let summary = summaries.session_summary(transcript).await?;
        let entry = HistoryEntry::now(summary.trim());
        self.append_entry(&entry)?;
        info!("Appended session record to {}", self.path.display());
        Ok(entry)
    }

    pub fn append_entry(&self, entry: &HistoryEntry) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(entry.to_log_text().as_bytes())?;
        debug!("Wrote {} summary chars", entry.summary.len());
        Ok(())
    }

    /// All entries in file order. A missing log has no entries.
    pub fn load_entries(&self) -> std::io::Result<Vec<HistoryEntry>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(parse_entries(&contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    pub fn stats(&self, recent: usize) -> std::io::Result<HistoryStats> {
        let entries = self.load_entries()?;
        let active_days = entries.iter().map(HistoryEntry::date).collect::<BTreeSet<_>>().len();
        let skip = entries.len().saturating_sub(recent);

        Ok(HistoryStats {
            sessions: entries.len(),
            active_days,
            recent: entries[skip..].iter().rev().cloned().collect(),
        })
    }

    /// Markdown report of every recorded session.
    pub fn report(&self) -> std::io::Result<String> {
        let entries = self.load_entries()?;
        if entries.is_empty() {
            return Ok("# Joyna Session History\n\nNo sessions recorded.".to_string());
        }

        let stats = self.stats(0)?;
        let mut lines = vec![
            "# Joyna Session History".to_string(),
            String::new(),
            format!("- **Sessions**: {}", stats.sessions),
            format!("- **Active days**: {}", stats.active_days),
            String::new(),
        ];
        for entry in &entries {
            lines.push(format!("## {}", entry.timestamp));
            lines.push(entry.summary.clone());
            lines.push(String::new());
        }
        Ok(lines.join("\n"))
    }
}

fn parse_entries(contents: &str) -> Vec<HistoryEntry> {
    let mut entries = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in contents.lines() {
        if let Some(timestamp) = line.strip_prefix(TIMESTAMP_PREFIX) {
            if let Some(entry) = current.take() {
                entries.push(finish_entry(entry));
            }
            current = Some((timestamp.trim().to_string(), Vec::new()));
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }
    if let Some(entry) = current {
        entries.push(finish_entry(entry));
    }
    entries
}

fn finish_entry((timestamp, body): (String, Vec<&str>)) -> HistoryEntry {
    HistoryEntry {
        timestamp,
        summary: body.join("\n").trim().to_string(),
    }
}
