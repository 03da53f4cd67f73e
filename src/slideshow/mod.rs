//! Slideshow loop
//!
//! Rendering is somebody else's job: the loop only decides *what* to show
//! and hands the path to a [`Presenter`]. It reads images exclusively from
//! registry snapshots and tolerates entries whose file has disappeared.
//!
//! The display-refresh event is the registry's revision `watch` channel.
//! The slideshow is its consumer and clears it with `borrow_and_update`
//! each time it wakes.

use crate::registry::Registry;
use crate::settings::{types, RuntimeVars};
use async_trait::async_trait;
use rand::seq::IteratorRandom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Displays one image
#[async_trait]
pub trait Presenter: Send + Sync {
    async fn show(&self, path: &Path) -> crate::Result<()>;
}

/// Presenter that only logs what would be displayed
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPresenter;

#[async_trait]
impl Presenter for LogPresenter {
    async fn show(&self, path: &Path) -> crate::Result<()> {
        tracing::info!(image = %path.display(), "Showing image");
        Ok(())
    }
}

/// Picks a random registered image every `flip_frequency` seconds
pub struct Slideshow {
    registry: Arc<Registry>,
    vars: Arc<RuntimeVars>,
    presenter: Arc<dyn Presenter>,
    default_flip: u64,
}

impl Slideshow {
    pub fn new(
        registry: Arc<Registry>,
        vars: Arc<RuntimeVars>,
        presenter: Arc<dyn Presenter>,
        default_flip: u64,
    ) -> Self {
        Self {
            registry,
            vars,
            presenter,
            default_flip,
        }
    }

    /// Run until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut refresh = self.registry.subscribe();
        loop {
            refresh.borrow_and_update();
            match self.next_image().await {
                Some(path) => {
                    if let Err(e) = self.presenter.show(&path).await {
                        tracing::warn!(image = %path.display(), error = %e, "Failed to present image");
                    }
                    let flip = Duration::from_secs(
                        self.vars
                            .get_u64(types::FLIP_FREQUENCY, self.default_flip)
                            .await
                            .max(1),
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(flip) => {}
                    }
                }
                None => {
                    tracing::debug!("No images to show, waiting for downloads");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        changed = refresh.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
        tracing::info!("Slideshow stopped");
    }

    /// Pick a random image that still exists on disk
    pub async fn next_image(&self) -> Option<PathBuf> {
        let mut candidates = self.registry.snapshot().await;
        while !candidates.is_empty() {
            let pick = candidates.iter().choose(&mut rand::thread_rng())?.clone();
            if tokio::fs::try_exists(&pick).await.unwrap_or(false) {
                return Some(pick);
            }
            tracing::debug!(image = %pick.display(), "Skipping missing image");
            candidates.remove(&pick);
        }
        None
    }
}
