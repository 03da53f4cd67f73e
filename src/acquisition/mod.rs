//! Image acquisition
//!
//! An [`Acquirer`] performs one pass over the current TermSet, writing files
//! under `<image_root>/<term>/` and registering them. The [`Downloader`]
//! worker repeats that pass forever, sleeping between passes until either
//! the download interval elapses or the new-terms event fires.
//!
//! ## New-terms event
//!
//! [`TermSignal`] wraps a `tokio::sync::Notify`. Control sessions set it
//! after committing terms or on `^download`. The downloader is its only
//! consumer: awaiting `notified()` takes the stored permit, which clears the
//! event. A permit stored while a pass is running is kept, so a commit made
//! mid-pass triggers exactly one more pass instead of being lost.

pub mod blacklist;
pub mod http;
pub mod scan;

pub use blacklist::Blacklist;
pub use http::{HttpAcquirer, SearchProvider};
pub use scan::DirectoryAcquirer;

use crate::registry::Registry;
use crate::settings::{types, RuntimeVars};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Level-triggered "new terms" event
#[derive(Clone, Default)]
pub struct TermSignal {
    notify: Arc<Notify>,
}

impl TermSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the event. Repeated calls before the consumer wakes coalesce.
    pub fn signal(&self) {
        self.notify.notify_one();
    }

    /// Wait for the event and clear it
    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// Inputs for one acquisition pass
pub struct AcquireContext<'a> {
    pub terms: &'a BTreeSet<String>,
    pub image_root: &'a std::path::Path,
    pub registry: &'a Registry,
    pub vars: &'a RuntimeVars,
}

/// Result of one acquisition pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquireSummary {
    /// Paths newly added to the registry
    pub added: usize,
    /// Candidates that failed to download
    pub failed: usize,
    /// Candidates skipped (blacklisted, not http, already present)
    pub skipped: usize,
}

/// One download pass over the current terms
#[async_trait]
pub trait Acquirer: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Fetch images for `ctx.terms` and register them
    async fn acquire(&self, ctx: AcquireContext<'_>) -> crate::Result<AcquireSummary>;
}

/// Background acquisition worker
pub struct Downloader {
    acquirer: Arc<dyn Acquirer>,
    registry: Arc<Registry>,
    vars: Arc<RuntimeVars>,
    signal: TermSignal,
    image_root: PathBuf,
    default_interval: u64,
}

impl Downloader {
    pub fn new(
        acquirer: Arc<dyn Acquirer>,
        registry: Arc<Registry>,
        vars: Arc<RuntimeVars>,
        signal: TermSignal,
        image_root: PathBuf,
        default_interval: u64,
    ) -> Self {
        Self {
            acquirer,
            registry,
            vars,
            signal,
            image_root,
            default_interval,
        }
    }

    /// Run passes until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(acquirer = self.acquirer.name(), "Downloader started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.run_pass() => {}
            }

            let interval = Duration::from_secs(
                self.vars
                    .get_u64(types::IMAGE_DOWNLOAD_INTERVAL, self.default_interval)
                    .await
                    .max(1),
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.signal.wait() => {
                    tracing::info!("Downloader woke up on new terms");
                }
                _ = tokio::time::sleep(interval) => {
                    tracing::debug!(interval_secs = interval.as_secs(), "Downloader interval elapsed");
                }
            }
        }
        tracing::info!("Downloader stopped");
    }

    /// Run a single pass, logging instead of propagating failures
    pub async fn run_pass(&self) -> Option<AcquireSummary> {
        let terms = self.registry.terms().await;
        let ctx = AcquireContext {
            terms: &terms,
            image_root: &self.image_root,
            registry: &self.registry,
            vars: &self.vars,
        };
        match self.acquirer.acquire(ctx).await {
            Ok(summary) => {
                tracing::info!(
                    acquirer = self.acquirer.name(),
                    terms = terms.len(),
                    added = summary.added,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "Acquisition pass finished"
                );
                Some(summary)
            }
            Err(e) => {
                tracing::error!(acquirer = self.acquirer.name(), error = %e, "Acquisition pass failed");
                None
            }
        }
    }
}
