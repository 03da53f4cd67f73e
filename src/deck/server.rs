//! ImageDeck service implementation

use crate::acquisition::{
    Acquirer, Blacklist, DirectoryAcquirer, Downloader, HttpAcquirer, SearchProvider, TermSignal,
};
use crate::config::ImageDeckConfig;
use crate::control::{ControlServer, SessionContext};
use crate::error::{Error, Result};
use crate::reaper::{Reaper, ReaperHandle};
use crate::registry::{format_terms, scan_terms, Registry};
use crate::settings::{PersistedState, RuntimeVars};
use crate::slideshow::{LogPresenter, Presenter, Slideshow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Service state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeckState {
    /// Not started
    Stopped,
    /// Starting up
    Starting,
    /// Running
    Running,
    /// Shutting down
    ShuttingDown,
}

/// Handles that only exist while the service runs
struct Runtime {
    cancel: CancellationToken,
    workers: TaskTracker,
    sessions: TaskTracker,
    local_addr: SocketAddr,
    reaper: ReaperHandle,
}

/// The image pipeline: registry, workers and control server
pub struct ImageDeck {
    config: ImageDeckConfig,
    state: Arc<RwLock<DeckState>>,
    registry: Arc<Registry>,
    vars: Arc<RuntimeVars>,
    signal: TermSignal,
    blacklist: Arc<Blacklist>,
    acquirer: Arc<dyn Acquirer>,
    presenter: Option<Arc<dyn Presenter>>,
    runtime: Mutex<Option<Runtime>>,
}

impl ImageDeck {
    /// Create a service that registers files found in term directories and
    /// logs slideshow picks
    pub fn new(config: ImageDeckConfig) -> Self {
        let presenter: Option<Arc<dyn Presenter>> = if config.slideshow.enabled {
            Some(Arc::new(LogPresenter))
        } else {
            None
        };
        Self::with_parts(
            config,
            Arc::new(DirectoryAcquirer),
            presenter,
            Arc::new(Blacklist::new()),
        )
    }

    fn with_parts(
        config: ImageDeckConfig,
        acquirer: Arc<dyn Acquirer>,
        presenter: Option<Arc<dyn Presenter>>,
        blacklist: Arc<Blacklist>,
    ) -> Self {
        let registry = Arc::new(Registry::new(config.downloader.search_terms.clone()));
        let vars = Arc::new(RuntimeVars::from_config(&config));
        Self {
            config,
            state: Arc::new(RwLock::new(DeckState::Stopped)),
            registry,
            vars,
            signal: TermSignal::new(),
            blacklist,
            acquirer,
            presenter,
            runtime: Mutex::new(None),
        }
    }

    /// Get current state
    pub async fn state(&self) -> DeckState {
        *self.state.read().await
    }

    /// Start the service.
    ///
    /// Restores persisted terms, variables and blacklist, rebuilds the
    /// registry from disk, binds the control listener and spawns the
    /// workers. A bind failure is returned and leaves the service stopped.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != DeckState::Stopped {
            return Err(Error::Server("ImageDeck already running".to_string()));
        }
        *state = DeckState::Starting;
        drop(state);

        tracing::info!("Starting ImageDeck");

        match self.launch().await {
            Ok(runtime) => {
                tracing::info!(addr = %runtime.local_addr, "ImageDeck started");
                *self.runtime.lock().await = Some(runtime);
                *self.state.write().await = DeckState::Running;
                Ok(())
            }
            Err(e) => {
                *self.state.write().await = DeckState::Stopped;
                Err(e)
            }
        }
    }

    async fn launch(&self) -> Result<Runtime> {
        self.restore().await;

        let image_root = self.config.images.image_dir.clone();
        tokio::fs::create_dir_all(&image_root).await?;
        self.rebuild_registry(&image_root).await?;

        let (reaper, reaper_handle) = Reaper::new(
            self.registry.clone(),
            self.vars.clone(),
            image_root.clone(),
            self.config.images.max_file_age_secs,
            self.config.images.clean_interval_secs,
        );

        let ctx = Arc::new(SessionContext {
            registry: self.registry.clone(),
            vars: self.vars.clone(),
            reaper: reaper_handle.clone(),
            signal: self.signal.clone(),
            image_root: image_root.clone(),
            default_max_age: self.config.images.max_file_age_secs,
            max_line_length: self.config.server.max_line_length,
        });
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let server = ControlServer::bind(&addr, ctx).await?;
        let local_addr = server.local_addr()?;

        let cancel = CancellationToken::new();
        let workers = TaskTracker::new();
        let sessions = TaskTracker::new();

        workers.spawn(reaper.run(cancel.clone()));

        let downloader = Downloader::new(
            self.acquirer.clone(),
            self.registry.clone(),
            self.vars.clone(),
            self.signal.clone(),
            image_root,
            self.config.downloader.interval_secs,
        );
        workers.spawn(downloader.run(cancel.clone()));

        if let Some(presenter) = &self.presenter {
            let slideshow = Slideshow::new(
                self.registry.clone(),
                self.vars.clone(),
                presenter.clone(),
                self.config.slideshow.flip_frequency_secs,
            );
            workers.spawn(slideshow.run(cancel.clone()));
        }

        workers.spawn(server.serve(cancel.clone(), sessions.clone()));
        workers.close();

        Ok(Runtime {
            cancel,
            workers,
            sessions,
            local_addr,
            reaper: reaper_handle,
        })
    }

    /// Overlay persisted terms, variables and blacklist. Unreadable files
    /// are logged and ignored.
    async fn restore(&self) {
        let state_path = self.config.storage.state_path();
        let blacklist_path = self.config.storage.blacklist_path();
        match PersistedState::load(&state_path).await {
            Ok(Some(saved)) => {
                tracing::info!(
                    terms = %format_terms(&saved.search_terms),
                    vars = saved.vars.len(),
                    "Restored persisted state"
                );
                self.registry.commit_terms(saved.search_terms).await;
                self.vars.restore(saved.vars).await;
            }
            Ok(None) => {
                tracing::debug!(path = %state_path.display(), "No persisted state");
            }
            Err(e) => {
                tracing::warn!(path = %state_path.display(), error = %e, "Failed to load persisted state");
            }
        }

        match self.blacklist.load_from(&blacklist_path).await {
            Ok(count) if count > 0 => tracing::info!(count, "Loaded url blacklist"),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(path = %blacklist_path.display(), error = %e, "Failed to load url blacklist");
            }
        }
    }

    /// Register every file already present for the current terms
    async fn rebuild_registry(&self, image_root: &std::path::Path) -> Result<()> {
        let terms = self.registry.terms().await;
        let root = image_root.to_path_buf();
        let found = tokio::task::spawn_blocking(move || scan_terms(&root, &terms))
            .await
            .map_err(|e| Error::Internal(format!("Startup scan panicked: {}", e)))?;
        let added = self.registry.add_all(found).await;
        tracing::info!(images = added, "Registry rebuilt from disk");
        Ok(())
    }

    /// Stop the service.
    ///
    /// Cancels every worker, waits up to the drain timeout for open
    /// sessions, then writes terms, variables and blacklist to disk.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != DeckState::Running {
            return Ok(());
        }
        *state = DeckState::ShuttingDown;
        drop(state);

        tracing::info!("Stopping ImageDeck");

        if let Some(runtime) = self.runtime.lock().await.take() {
            runtime.cancel.cancel();

            let drain = Duration::from_secs(self.config.server.drain_timeout_secs);
            runtime.sessions.close();
            if tokio::time::timeout(drain, runtime.sessions.wait())
                .await
                .is_err()
            {
                tracing::warn!(
                    open = runtime.sessions.len(),
                    "Sessions still open after drain timeout"
                );
            }
            if tokio::time::timeout(drain, runtime.workers.wait())
                .await
                .is_err()
            {
                tracing::warn!("Workers did not stop within drain timeout");
            }
        }

        let result = self.persist().await;
        *self.state.write().await = DeckState::Stopped;

        tracing::info!("ImageDeck stopped");

        result
    }

    /// Write terms, variables and blacklist to disk
    pub async fn persist(&self) -> Result<()> {
        let state_path = self.config.storage.state_path();
        let saved = PersistedState {
            search_terms: self.registry.terms().await,
            vars: self.vars.snapshot().await,
        };
        saved.save(&state_path).await?;
        self.blacklist.save(&self.config.storage.blacklist_path()).await?;
        tracing::debug!(path = %state_path.display(), "Persisted state");
        Ok(())
    }

    /// Get the shared registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Get the runtime variables
    pub fn vars(&self) -> &Arc<RuntimeVars> {
        &self.vars
    }

    /// Get the new-terms event
    pub fn term_signal(&self) -> &TermSignal {
        &self.signal
    }

    /// Get the url blacklist
    pub fn blacklist(&self) -> &Arc<Blacklist> {
        &self.blacklist
    }

    /// Get configuration
    pub fn config(&self) -> &ImageDeckConfig {
        &self.config
    }

    /// Address the control server is bound to, while running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.runtime.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Reaper trigger handle, while running
    pub async fn reaper(&self) -> Option<ReaperHandle> {
        self.runtime.lock().await.as_ref().map(|r| r.reaper.clone())
    }

    /// Get service status information
    pub async fn status(&self) -> DeckStatus {
        let state = *self.state.read().await;
        let (local_addr, reaper, last_reap_at) = match self.runtime.lock().await.as_ref() {
            Some(r) => (
                Some(r.local_addr.to_string()),
                Some(format!("{:?}", r.reaper.state())),
                r.reaper.last_pass_at(),
            ),
            None => (None, None, None),
        };
        DeckStatus {
            state: format!("{:?}", state),
            local_addr,
            image_count: self.registry.len().await,
            search_terms: self.registry.terms().await.into_iter().collect(),
            acquirer: self.acquirer.name().to_string(),
            reaper,
            last_reap_at,
        }
    }
}

/// Service status information
#[derive(Debug, Clone, Serialize)]
pub struct DeckStatus {
    /// Current state
    pub state: String,
    /// Control server address
    pub local_addr: Option<String>,
    /// Registered images
    pub image_count: usize,
    /// Committed search terms
    pub search_terms: Vec<String>,
    /// Acquirer feeding the registry
    pub acquirer: String,
    /// Reaper state
    pub reaper: Option<String>,
    /// When the last reap pass finished
    pub last_reap_at: Option<DateTime<Utc>>,
}

/// Builder for ImageDeck
pub struct ImageDeckBuilder {
    config: ImageDeckConfig,
    acquirer: Option<Arc<dyn Acquirer>>,
    search_provider: Option<Arc<dyn SearchProvider>>,
    presenter: Option<Arc<dyn Presenter>>,
    blacklist: Option<Arc<Blacklist>>,
}

impl ImageDeckBuilder {
    /// Create a new builder with default config
    pub fn new() -> Self {
        Self {
            config: ImageDeckConfig::default(),
            acquirer: None,
            search_provider: None,
            presenter: None,
            blacklist: None,
        }
    }

    /// Set the configuration
    pub fn config(mut self, config: ImageDeckConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the control server host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.server.host = host.into();
        self
    }

    /// Set the control server port
    pub fn port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    /// Set the image root directory
    pub fn image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.images.image_dir = dir.into();
        self
    }

    /// Keep state and blacklist files under `dir`
    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage.base_dir = dir.into();
        self
    }

    /// Enable/disable the slideshow
    pub fn slideshow(mut self, enabled: bool) -> Self {
        self.config.slideshow.enabled = enabled;
        self
    }

    /// Use a custom acquirer for download passes
    pub fn acquirer(mut self, acquirer: Arc<dyn Acquirer>) -> Self {
        self.acquirer = Some(acquirer);
        self
    }

    /// Download search results over HTTP. The acquirer sends the configured
    /// user agent and shares the service's blacklist. Ignored when a custom
    /// acquirer is set.
    pub fn search_provider(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.search_provider = Some(provider);
        self
    }

    /// Use a custom presenter for the slideshow
    pub fn presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    /// Share a blacklist with the acquirer so it is loaded and saved with
    /// the service state
    pub fn blacklist(mut self, blacklist: Arc<Blacklist>) -> Self {
        self.blacklist = Some(blacklist);
        self
    }

    /// Build the service
    pub fn build(self) -> Result<ImageDeck> {
        let presenter = if self.config.slideshow.enabled {
            let fallback: Arc<dyn Presenter> = Arc::new(LogPresenter);
            Some(self.presenter.unwrap_or(fallback))
        } else {
            None
        };
        let blacklist = self.blacklist.unwrap_or_default();
        let acquirer: Arc<dyn Acquirer> = match (self.acquirer, self.search_provider) {
            (Some(acquirer), _) => acquirer,
            (None, Some(provider)) => Arc::new(HttpAcquirer::new(
                provider,
                blacklist.clone(),
                &self.config.downloader.user_agent,
            )?),
            (None, None) => Arc::new(DirectoryAcquirer),
        };
        Ok(ImageDeck::with_parts(
            self.config,
            acquirer,
            presenter,
            blacklist,
        ))
    }
}

impl Default for ImageDeckBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn builder(dir: &std::path::Path) -> ImageDeckBuilder {
        ImageDeckBuilder::new()
            .host("127.0.0.1")
            .port(0)
            .image_dir(dir.join("images"))
            .state_dir(dir.join("state"))
            .slideshow(false)
    }

    #[tokio::test]
    async fn test_deck_creation() {
        let dir = tempfile::tempdir().unwrap();
        let deck = builder(dir.path()).port(4242).build().unwrap();

        assert_eq!(deck.state().await, DeckState::Stopped);
        assert_eq!(deck.config().server.port, 4242);
        assert!(deck.local_addr().await.is_none());
        assert!(deck.reaper().await.is_none());
    }

    #[tokio::test]
    async fn test_deck_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let deck = builder(dir.path()).build().unwrap();

        deck.start().await.unwrap();
        assert_eq!(deck.state().await, DeckState::Running);
        let addr = deck.local_addr().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(deck.start().await.is_err());

        let status = deck.status().await;
        assert_eq!(status.state, "Running");
        assert_eq!(status.reaper.as_deref(), Some("Idle"));
        assert_eq!(status.acquirer, "directory");
        assert!(status.last_reap_at.is_none());

        deck.reaper().await.unwrap().reap_now().await.unwrap();
        assert!(deck.status().await.last_reap_at.is_some());

        deck.stop().await.unwrap();
        assert_eq!(deck.state().await, DeckState::Stopped);
        assert!(dir.path().join("state").join("state.json").exists());
        assert!(dir.path().join("state").join("urlblacklist").exists());
    }

    #[tokio::test]
    async fn test_start_rebuilds_registry_and_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        std::fs::create_dir_all(images.join("cats")).unwrap();
        std::fs::create_dir_all(images.join("dogs")).unwrap();
        std::fs::write(images.join("cats").join("a.jpg"), b"a").unwrap();
        std::fs::write(images.join("dogs").join("b.jpg"), b"b").unwrap();

        let mut vars = std::collections::BTreeMap::new();
        vars.insert("flip_frequency".to_string(), serde_json::Value::from(9u64));
        PersistedState {
            search_terms: ["cats".to_string()].into_iter().collect(),
            vars,
        }
        .save(&dir.path().join("state").join("state.json"))
        .await
        .unwrap();
        std::fs::write(dir.path().join("state").join("urlblacklist"), "https://bad.example/x\n")
            .unwrap();

        let deck = builder(dir.path()).build().unwrap();
        deck.start().await.unwrap();

        let expected: BTreeSet<String> = ["cats".to_string()].into_iter().collect();
        assert_eq!(deck.registry().terms().await, expected);
        assert!(deck.registry().contains(&images.join("cats").join("a.jpg")).await);
        assert!(!deck.registry().contains(&images.join("dogs").join("b.jpg")).await);
        assert_eq!(deck.vars().get_u64("flip_frequency", 0).await, 9);
        assert!(deck.blacklist().is_blocked("https://bad.example/x").await);

        deck.stop().await.unwrap();
    }

    struct NoResults;

    #[async_trait::async_trait]
    impl SearchProvider for NoResults {
        async fn search(&self, _term: &str, _limit: usize) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_search_provider_selects_http_acquirer() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ImageDeckConfig::default();
        config.downloader.user_agent = "imagedeck-test/1.0".to_string();
        let deck = ImageDeckBuilder::new()
            .config(config)
            .image_dir(dir.path().join("images"))
            .state_dir(dir.path().join("state"))
            .slideshow(false)
            .search_provider(Arc::new(NoResults))
            .build()
            .unwrap();
        assert_eq!(deck.status().await.acquirer, "http");
    }

    #[tokio::test]
    async fn test_state_files_live_under_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let deck = builder(dir.path()).build().unwrap();
        assert_eq!(
            deck.config().storage.state_path(),
            dir.path().join("state").join("state.json")
        );
        deck.start().await.unwrap();
        deck.stop().await.unwrap();
        assert!(dir.path().join("state").join("state.json").exists());
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let deck = builder(dir.path()).port(port).build().unwrap();
        let err = deck.start().await.unwrap_err();
        assert!(matches!(err, Error::Server(_)));
        assert_eq!(deck.state().await, DeckState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let deck = builder(dir.path()).build().unwrap();
        deck.stop().await.unwrap();
        assert_eq!(deck.state().await, DeckState::Stopped);
        assert!(!dir.path().join("state").join("state.json").exists());
    }
}
