//! HTTP image downloader
//!
//! Candidate URLs come from an external [`SearchProvider`]. Each URL is
//! stored as `<image_root>/<term>/<sha256(url)>`, so the same URL is never
//! downloaded twice for a term. Failed downloads leave no partial file
//! behind and count toward the URL's blacklist threshold.

use super::{AcquireContext, AcquireSummary, Acquirer, Blacklist};
use crate::registry::term_dir;
use crate::settings::types;
use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Source of candidate image URLs for a term
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Return up to `limit` candidate URLs for `term`
    async fn search(&self, term: &str, limit: usize) -> crate::Result<Vec<String>>;
}

/// File name used for a downloaded URL
pub fn file_name_for(url: &str) -> String {
    format!("{:x}", Sha256::digest(url.as_bytes()))
}

/// Downloads search results over HTTP
pub struct HttpAcquirer {
    client: reqwest::Client,
    provider: Arc<dyn SearchProvider>,
    blacklist: Arc<Blacklist>,
    url_filter: Regex,
}

impl HttpAcquirer {
    /// Build with a default client sending `user_agent`
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        blacklist: Arc<Blacklist>,
        user_agent: &str,
    ) -> crate::Result<Self> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Self::with_client(client, provider, blacklist)
    }

    /// Build with a caller-supplied client
    pub fn with_client(
        client: reqwest::Client,
        provider: Arc<dyn SearchProvider>,
        blacklist: Arc<Blacklist>,
    ) -> crate::Result<Self> {
        let url_filter = Regex::new(r"^https?://")
            .map_err(|e| crate::Error::Internal(format!("Invalid URL filter: {}", e)))?;
        Ok(Self {
            client,
            provider,
            blacklist,
            url_filter,
        })
    }

    pub fn blacklist(&self) -> &Arc<Blacklist> {
        &self.blacklist
    }

    async fn fetch(&self, url: &str, path: &Path) -> crate::Result<u64> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl Acquirer for HttpAcquirer {
    fn name(&self) -> &str {
        "http"
    }

    async fn acquire(&self, ctx: AcquireContext<'_>) -> crate::Result<AcquireSummary> {
        let limit = ctx.vars.get_u64(types::RESULTS_PER_PAGE, 10).await as usize;
        let max_failures = ctx.vars.get_u64(types::URL_RETRY, 3).await;
        let mut summary = AcquireSummary::default();

        for term in ctx.terms {
            let Some(dir) = term_dir(ctx.image_root, term) else {
                tracing::warn!(term = %term, "Skipping term outside the image root");
                continue;
            };
            let urls = match self.provider.search(term, limit).await {
                Ok(urls) => urls,
                Err(e) => {
                    tracing::warn!(term = %term, error = %e, "Search failed");
                    continue;
                }
            };

            if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                tracing::warn!(dir = %dir.display(), error = %e, "Cannot create term directory");
                continue;
            }

            for url in urls {
                if !self.url_filter.is_match(&url) || self.blacklist.is_blocked(&url).await {
                    summary.skipped += 1;
                    continue;
                }
                let path = dir.join(file_name_for(&url));
                if ctx.registry.contains(&path).await {
                    summary.skipped += 1;
                    continue;
                }

                match self.fetch(&url, &path).await {
                    Ok(bytes) => {
                        tracing::debug!(url = %url, bytes, path = %path.display(), "Downloaded image");
                        ctx.registry.add(path).await;
                        summary.added += 1;
                    }
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "Failed to download image");
                        summary.failed += 1;
                        if let Err(e) = tokio::fs::remove_file(&path).await {
                            if e.kind() != std::io::ErrorKind::NotFound {
                                tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial download");
                            }
                        }
                        if self.blacklist.record_failure(&url, max_failures).await {
                            tracing::info!(url = %url, "Blacklisted url");
                        }
                    }
                }
            }
        }
        Ok(summary)
    }
}
