//! URL blacklist
//!
//! URLs that fail to download `url_retry` times are never tried again.
//! Persisted as a plain newline-separated file.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::sync::RwLock;

#[derive(Default)]
struct BlacklistInner {
    blocked: HashSet<String>,
    failures: HashMap<String, u64>,
}

/// Blocked URLs plus per-URL failure counts
#[derive(Default)]
pub struct Blacklist {
    inner: RwLock<BlacklistInner>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a blacklist file into this one, returning the number of URLs
    /// read. A missing file reads as empty.
    pub async fn load_from(&self, path: &Path) -> crate::Result<usize> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let urls: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        let count = urls.len();
        self.inner.write().await.blocked.extend(urls);
        Ok(count)
    }

    /// Write blocked URLs, sorted, one per line
    pub async fn save(&self, path: &Path) -> crate::Result<()> {
        let mut urls: Vec<String> = self.inner.read().await.blocked.iter().cloned().collect();
        urls.sort();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut content = urls.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub async fn is_blocked(&self, url: &str) -> bool {
        self.inner.read().await.blocked.contains(url)
    }

    /// Count a failure. Returns `true` if this failure blocked the URL.
    pub async fn record_failure(&self, url: &str, max_failures: u64) -> bool {
        let mut inner = self.inner.write().await;
        let count = inner.failures.entry(url.to_string()).or_insert(0);
        *count += 1;
        if *count >= max_failures.max(1) {
            inner.failures.remove(url);
            inner.blocked.insert(url.to_string())
        } else {
            false
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.blocked.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.blocked.is_empty()
    }
}
