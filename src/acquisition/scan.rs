//! Acquirer that registers files already present in term directories

use super::{AcquireContext, AcquireSummary, Acquirer};
use crate::registry::scan_terms;
use async_trait::async_trait;

/// Picks up images placed in `<image_root>/<term>/` by other tools
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryAcquirer;

#[async_trait]
impl Acquirer for DirectoryAcquirer {
    fn name(&self) -> &str {
        "directory"
    }

    async fn acquire(&self, ctx: AcquireContext<'_>) -> crate::Result<AcquireSummary> {
        let root = ctx.image_root.to_path_buf();
        let terms = ctx.terms.clone();
        let found = tokio::task::spawn_blocking(move || scan_terms(&root, &terms))
            .await
            .map_err(|e| crate::Error::Internal(format!("Directory scan panicked: {}", e)))?;

        let found_count = found.len();
        let added = ctx.registry.add_all(found).await;
        Ok(AcquireSummary {
            added,
            failed: 0,
            skipped: found_count - added,
        })
    }
}
