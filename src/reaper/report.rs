//! Reap pass reports

use crate::config::DAY_SECS;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;

/// One deleted file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapEntry {
    pub path: PathBuf,
    pub age: Duration,
    pub size: u64,
}

impl ReapEntry {
    /// `<path>, mtime (days):<d.dd>, space:<k.kk>kb`
    pub fn format(&self) -> String {
        format!(
            "{}, mtime (days):{:.2}, space:{:.2}kb",
            self.path.display(),
            self.age.as_secs_f64() / DAY_SECS as f64,
            self.size as f64 / 1024.0
        )
    }
}

/// Deletions of one reap pass, sorted by path
#[derive(Debug, Clone)]
pub struct ReapReport {
    entries: Vec<ReapEntry>,
    pub finished_at: DateTime<Utc>,
}

impl ReapReport {
    pub fn new(mut entries: Vec<ReapEntry>) -> Self {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            entries,
            finished_at: Utc::now(),
        }
    }

    pub fn entries(&self) -> &[ReapEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes freed by this pass
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// Client-facing rendering, one entry per line
    pub fn format(&self) -> String {
        if self.entries.is_empty() {
            return "No images removed.".to_string();
        }
        self.entries
            .iter()
            .map(ReapEntry::format)
            .collect::<Vec<_>>()
            .join("\r\n")
    }
}
