//! ImageDeck configuration management

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Seconds in a day
pub const DAY_SECS: u64 = 60 * 60 * 24;

/// Main ImageDeck configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageDeckConfig {
    /// Control server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Image store and reaping configuration
    #[serde(default)]
    pub images: ImagesConfig,

    /// Downloader configuration
    #[serde(default)]
    pub downloader: DownloaderConfig,

    /// Slideshow configuration
    #[serde(default)]
    pub slideshow: SlideshowConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
}

impl ImageDeckConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            crate::Error::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }
}

/// Control server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to (loopback only by default)
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Maximum accepted line length in bytes
    pub max_line_length: usize,

    /// Seconds to wait for in-flight sessions on shutdown
    pub drain_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9999,
            max_line_length: 8192,
            drain_timeout_secs: 5,
        }
    }
}

/// Image store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    /// Root directory holding one sub-directory per search term
    pub image_dir: PathBuf,

    /// Files at least this old (seconds) are reaped
    pub max_file_age_secs: u64,

    /// Interval between periodic reap passes (seconds)
    pub clean_interval_secs: u64,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            image_dir: default_base_dir().join("images"),
            max_file_age_secs: 90 * DAY_SECS,
            clean_interval_secs: DAY_SECS,
        }
    }
}

/// Downloader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// Seconds between download passes when no new terms arrive
    pub interval_secs: u64,

    /// Search results requested per page
    pub results_per_page: u64,

    /// Failed attempts before a URL is blacklisted
    pub url_retry: u64,

    /// Initial search terms (overridden by persisted state)
    pub search_terms: BTreeSet<String>,

    /// User agent sent with image requests
    pub user_agent: String,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60 * 60,
            results_per_page: 10,
            url_retry: 3,
            search_terms: BTreeSet::new(),
            user_agent: format!("imagedeck/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Slideshow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideshowConfig {
    /// Enable the slideshow loop
    pub enabled: bool,

    /// Seconds each image stays on screen
    pub flip_frequency_secs: u64,
}

impl Default for SlideshowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            flip_frequency_secs: 5,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for persisted state
    pub base_dir: PathBuf,

    /// Persisted terms and runtime variables, relative to `base_dir`
    /// unless absolute
    pub state_file: PathBuf,

    /// Blacklisted URLs, one per line, relative to `base_dir` unless
    /// absolute
    pub blacklist_file: PathBuf,
}

impl StorageConfig {
    /// Resolved path of the state file
    pub fn state_path(&self) -> PathBuf {
        self.base_dir.join(&self.state_file)
    }

    /// Resolved path of the blacklist file
    pub fn blacklist_path(&self) -> PathBuf {
        self.base_dir.join(&self.blacklist_file)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            state_file: PathBuf::from("state.json"),
            blacklist_file: PathBuf::from("urlblacklist"),
        }
    }
}

fn default_base_dir() -> PathBuf {
    dirs_next::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("imagedeck")
}
