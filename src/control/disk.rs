//! Space queries for `^space` and `^idea`

use std::io;
use std::path::{Path, PathBuf};

const MEGABYTE: f64 = 1024.0 * 1024.0;
const GIGABYTE: f64 = MEGABYTE * 1024.0;

/// Filesystem capacity in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

impl DiskUsage {
    pub fn format(&self) -> String {
        format!("Total {} Used {} Free {}", self.total, self.used, self.free)
    }
}

/// Capacity of the filesystem holding `path`.
///
/// If `path` does not exist yet, its closest existing ancestor is queried.
pub fn disk_usage(path: &Path) -> io::Result<DiskUsage> {
    let target = existing_ancestor(path).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no existing ancestor for {}", path.display()),
        )
    })?;
    let total = fs2::total_space(&target)?;
    let free = fs2::available_space(&target)?;
    let used = total.saturating_sub(fs2::free_space(&target)?);
    Ok(DiskUsage { total, used, free })
}

fn existing_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .map(Path::to_path_buf)
}

/// `Space used: <g.gg>G <m.mm>M`
pub fn format_space_used(bytes: u64) -> String {
    format!(
        "Space used: {:.2}G {:.2}M",
        bytes as f64 / GIGABYTE,
        bytes as f64 / MEGABYTE
    )
}
