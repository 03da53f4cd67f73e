//! Shared image registry
//!
//! Holds the set of downloaded image paths and the active TermSet behind a
//! single `tokio::sync::RwLock`. The lock only ever covers the in-memory
//! mutation or copy; callers must finish any file-system I/O before calling
//! in and must not hold a snapshot guard across I/O (snapshots are owned
//! copies, so there is no guard to hold).
//!
//! Every effective image mutation bumps a revision counter on a
//! `tokio::sync::watch` channel. That channel is the display-refresh event:
//! the registry is its only writer, and each subscriber clears its own view
//! with `borrow_and_update`.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::{watch, RwLock};

struct RegistryInner {
    images: HashSet<PathBuf>,
    terms: BTreeSet<String>,
}

/// Shared registry of image paths and search terms
pub struct Registry {
    inner: RwLock<RegistryInner>,
    revision: watch::Sender<u64>,
}

impl Registry {
    /// Create a registry with the given initial terms and no images
    pub fn new(terms: BTreeSet<String>) -> Self {
        Self::with_images(terms, HashSet::new())
    }

    /// Create a registry from a startup scan
    pub fn with_images(terms: BTreeSet<String>, images: HashSet<PathBuf>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: RwLock::new(RegistryInner { images, terms }),
            revision,
        }
    }

    // =========================================================================
    // Images
    // =========================================================================

    /// Point-in-time copy of the image set
    pub async fn snapshot(&self) -> HashSet<PathBuf> {
        self.inner.read().await.images.clone()
    }

    /// Add one path. Returns `false` if it was already tracked.
    pub async fn add(&self, path: PathBuf) -> bool {
        let added = self.inner.write().await.images.insert(path);
        if added {
            self.bump();
        }
        added
    }

    /// Add a batch of paths in one critical section. Returns how many were new.
    pub async fn add_all<I>(&self, paths: I) -> usize
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let added = {
            let mut inner = self.inner.write().await;
            paths
                .into_iter()
                .filter(|p| inner.images.insert(p.clone()))
                .count()
        };
        if added > 0 {
            self.bump();
        }
        added
    }

    /// Remove one path. Returns `false` if it was not tracked.
    pub async fn remove(&self, path: &Path) -> bool {
        let removed = self.inner.write().await.images.remove(path);
        if removed {
            self.bump();
        }
        removed
    }

    /// Remove a batch of paths in one critical section, returning the ones
    /// that were actually tracked.
    pub async fn remove_all(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        let removed: Vec<PathBuf> = {
            let mut inner = self.inner.write().await;
            paths
                .iter()
                .filter(|p| inner.images.remove(p.as_path()))
                .cloned()
                .collect()
        };
        if !removed.is_empty() {
            self.bump();
        }
        removed
    }

    /// Whether a path is tracked
    pub async fn contains(&self, path: &Path) -> bool {
        self.inner.read().await.images.contains(path)
    }

    /// Number of tracked images
    pub async fn len(&self) -> usize {
        self.inner.read().await.images.len()
    }

    /// Whether no images are tracked
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.images.is_empty()
    }

    /// Subscribe to the display-refresh revision counter
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }

    // =========================================================================
    // Terms
    // =========================================================================

    /// Copy of the committed TermSet
    pub async fn terms(&self) -> BTreeSet<String> {
        self.inner.read().await.terms.clone()
    }

    /// Replace the TermSet wholesale (last writer wins)
    pub async fn commit_terms(&self, terms: BTreeSet<String>) {
        let count = terms.len();
        self.inner.write().await.terms = terms;
        tracing::debug!(terms = count, "Committed term set");
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(BTreeSet::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn terms(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_add_and_remove() {
        let registry = Registry::default();
        assert!(registry.add(PathBuf::from("/img/cats/a")).await);
        assert!(!registry.add(PathBuf::from("/img/cats/a")).await);
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove(Path::new("/img/cats/a")).await);
        assert!(!registry.remove(Path::new("/img/cats/a")).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let registry = Registry::default();
        registry.add(PathBuf::from("/img/a")).await;

        let snapshot = registry.snapshot().await;
        registry.add(PathBuf::from("/img/b")).await;

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_remove_all_reports_tracked_only() {
        let registry = Registry::default();
        registry
            .add_all(vec![PathBuf::from("/a"), PathBuf::from("/b")])
            .await;

        let removed = registry
            .remove_all(&[PathBuf::from("/a"), PathBuf::from("/zzz")])
            .await;
        assert_eq!(removed, vec![PathBuf::from("/a")]);
        assert!(registry.contains(Path::new("/b")).await);
    }

    #[tokio::test]
    async fn test_revision_bumps_only_on_change() {
        let registry = Registry::default();
        let mut rx = registry.subscribe();
        assert_eq!(*rx.borrow_and_update(), 0);

        registry.add(PathBuf::from("/a")).await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);

        registry.add(PathBuf::from("/a")).await;
        registry.remove(Path::new("/missing")).await;
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_commit_terms_replaces() {
        let registry = Registry::new(terms(&["crystals", "jeans"]));
        registry.commit_terms(terms(&["cats"])).await;
        assert_eq!(registry.terms().await, terms(&["cats"]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_snapshot_never_sees_partial_batch() {
        let registry = Arc::new(Registry::default());

        let writer = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    let pair = vec![
                        PathBuf::from(format!("/img/{}/left", i)),
                        PathBuf::from(format!("/img/{}/right", i)),
                    ];
                    registry.add_all(pair.clone()).await;
                    if i % 2 == 0 {
                        registry.remove_all(&pair).await;
                    }
                }
            })
        };

        let reader = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    let snapshot = registry.snapshot().await;
                    for path in &snapshot {
                        let parent = path.parent().unwrap();
                        assert!(snapshot.contains(&parent.join("left")));
                        assert!(snapshot.contains(&parent.join("right")));
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        writer.await.unwrap();
        reader.await.unwrap();
        assert_eq!(registry.len().await, 200);
    }
}
