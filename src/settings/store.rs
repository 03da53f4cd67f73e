//! Shared runtime variables and persisted state

use super::types::{self, declared_type, VarType};
use crate::config::ImageDeckConfig;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tokio::sync::RwLock;

/// Outcome of a `^vars` merge
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VarsUpdate {
    /// Keys merged into the map
    pub applied: Vec<String>,
    /// One message per rejected pair
    pub errors: Vec<String>,
}

/// Mutable runtime configuration shared by workers and control sessions
pub struct RuntimeVars {
    vars: RwLock<BTreeMap<String, Value>>,
}

impl RuntimeVars {
    /// Create from an explicit map
    pub fn new(vars: BTreeMap<String, Value>) -> Self {
        Self {
            vars: RwLock::new(vars),
        }
    }

    /// Seed the live-tunable values from the file configuration
    pub fn from_config(config: &ImageDeckConfig) -> Self {
        let mut vars = BTreeMap::new();
        vars.insert(
            types::IMAGE_DOWNLOAD_INTERVAL.to_string(),
            Value::from(config.downloader.interval_secs),
        );
        vars.insert(
            types::RESULTS_PER_PAGE.to_string(),
            Value::from(config.downloader.results_per_page),
        );
        vars.insert(
            types::URL_RETRY.to_string(),
            Value::from(config.downloader.url_retry),
        );
        vars.insert(
            types::FLIP_FREQUENCY.to_string(),
            Value::from(config.slideshow.flip_frequency_secs),
        );
        vars.insert(
            types::MAX_FILE_AGE.to_string(),
            Value::from(config.images.max_file_age_secs),
        );
        vars.insert(
            types::IMAGE_CLEAN_INTERVAL.to_string(),
            Value::from(config.images.clean_interval_secs),
        );
        Self::new(vars)
    }

    /// Copy of the current map
    pub async fn snapshot(&self) -> BTreeMap<String, Value> {
        self.vars.read().await.clone()
    }

    /// Read an integer variable, falling back when absent or mistyped
    pub async fn get_u64(&self, key: &str, fallback: u64) -> u64 {
        self.vars
            .read()
            .await
            .get(key)
            .and_then(Value::as_u64)
            .unwrap_or(fallback)
    }

    /// Set a value directly, bypassing coercion
    pub async fn set(&self, key: impl Into<String>, value: Value) {
        self.vars.write().await.insert(key.into(), value);
    }

    /// Merge textual `key:value` pairs.
    ///
    /// Declared keys are coerced to their type. Undeclared keys are accepted
    /// as text only if already present; anything else is rejected. Rejected
    /// pairs never block the rest of the batch.
    pub async fn merge(&self, pairs: Vec<(String, String)>) -> VarsUpdate {
        let mut update = VarsUpdate::default();
        let mut vars = self.vars.write().await;
        for (key, raw) in pairs {
            let var_type = match declared_type(&key) {
                Some(t) => t,
                None if vars.contains_key(&key) => VarType::Text,
                None => {
                    update.errors.push(format!("unknown variable '{}'", key));
                    continue;
                }
            };
            match var_type.coerce(&raw) {
                Ok(value) => {
                    vars.insert(key.clone(), value);
                    update.applied.push(key);
                }
                Err(e) => update.errors.push(format!("{}: {}", key, e)),
            }
        }
        update
    }

    /// Render the map as a single JSON line
    pub async fn render(&self) -> String {
        let vars = self.vars.read().await;
        serde_json::to_string(&*vars).unwrap_or_else(|_| "{}".to_string())
    }

    /// Overlay previously persisted values
    pub async fn restore(&self, saved: BTreeMap<String, Value>) {
        self.vars.write().await.extend(saved);
    }
}

/// Terms and variables persisted across restarts
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistedState {
    #[serde(default)]
    pub search_terms: BTreeSet<String>,
    #[serde(default)]
    pub vars: BTreeMap<String, Value>,
}

impl PersistedState {
    /// Load state, returning `None` if the file does not exist
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write state atomically (temp file + rename)
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}
