//! Blocking directory scans over the image root
//!
//! Layout is `<image_root>/<term>/<file>`. These helpers never touch the
//! registry lock; run them on a blocking thread and feed the results in.

use std::collections::{BTreeSet, HashSet};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

/// A file found under a term directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub path: PathBuf,
    pub term: String,
    pub size: u64,
    pub modified: SystemTime,
}

/// Whether a term names exactly one directory directly under the image root
pub fn is_valid_term(term: &str) -> bool {
    let mut components = Path::new(term).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !term.contains(['/', '\\'])
}

/// Directory holding a term's images, or `None` when the term would
/// escape the image root
pub fn term_dir(image_root: &Path, term: &str) -> Option<PathBuf> {
    is_valid_term(term).then(|| image_root.join(term))
}

/// Paths of all regular files under the given terms' directories.
///
/// Missing term directories are skipped.
pub fn scan_terms(image_root: &Path, terms: &BTreeSet<String>) -> HashSet<PathBuf> {
    let mut images = HashSet::new();
    for term in terms {
        let Some(dir) = term_dir(image_root, term) else {
            tracing::warn!(term = %term, "Skipping term outside the image root");
            continue;
        };
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to read term directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                images.insert(entry.path());
            }
        }
    }
    images
}

/// Stat every file under every term directory of the image root.
///
/// Per-entry failures (file vanished, permission denied) are logged and
/// skipped. Only failing to read the root itself is an error.
pub fn walk_image_root(image_root: &Path) -> io::Result<Vec<ImageFile>> {
    let mut files = Vec::new();
    let terms = match std::fs::read_dir(image_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(e),
    };

    for term_entry in terms.flatten() {
        let term_path = term_entry.path();
        if !term_path.is_dir() {
            continue;
        }
        let term = term_entry.file_name().to_string_lossy().into_owned();
        let entries = match std::fs::read_dir(&term_path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %term_path.display(), error = %e, "Skipping unreadable term directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to stat image");
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            let modified = match metadata.modified() {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "No modification time");
                    continue;
                }
            };
            files.push(ImageFile {
                path,
                term: term.clone(),
                size: metadata.len(),
                modified,
            });
        }
    }
    Ok(files)
}

/// Total bytes of all files under all term directories
pub fn total_image_bytes(image_root: &Path) -> io::Result<u64> {
    Ok(walk_image_root(image_root)?.iter().map(|f| f.size).sum())
}
