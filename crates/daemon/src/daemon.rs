//! Daemon startup and main loop for Reel
//!
//! Wires the library index, view store, reconciler and ingestion pipeline
//! together and serves HTTP until shutdown.

use crate::concurrency::{derive_plan, ConcurrencyPlan};
use crate::config::{Config, ConfigError};
use crate::encode::{FfmpegTranscoder, Transcoder};
use crate::fetch::DirectLink;
use crate::ingest::{IngestError, IngestPipeline, IngestSettings};
use crate::library::{Library, LibraryError, PathEntry};
use crate::metrics::{new_shared_metrics, SharedMetrics};
use crate::reconcile::{ReconcileError, Reconciler};
use crate::server::{run_server, AppState, ServerError};
use crate::startup::{run_startup_checks, StartupError};
use crate::views::{StoreError, ViewStore};
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// View store could not be opened
    #[error("View store error: {0}")]
    Store(#[from] StoreError),

    /// A configured library path was rejected
    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    /// Filesystem watcher could not be created
    #[error("Reconciler error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Ingestion pipeline could not be built
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// Server error
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// Host and port do not resolve to an address
    #[error("Invalid listen address: {0}")]
    Address(String),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    /// Derived concurrency plan
    pub concurrency_plan: ConcurrencyPlan,
    /// Shared metrics state
    pub metrics: SharedMetrics,
    /// Path registry and video index
    pub library: Arc<Library>,
    /// Per-video view counters
    pub views: Arc<ViewStore>,
    /// Upload and import pipeline
    pub pipeline: Arc<IngestPipeline>,
    reconciler: Reconciler,
    reconciler_task: JoinHandle<()>,
}

impl Daemon {
    /// Initialize the daemon with configuration from file
    ///
    /// This performs the full startup sequence:
    /// 1. Load config from file
    /// 2. Apply environment overrides
    /// 3. Run startup checks (directories, transcoder)
    /// 4. Open the view store
    /// 5. Register and import every library path, then watch them
    ///
    /// # Arguments
    /// * `config_path` - Path to the config.toml file
    /// * `skip_checks` - Skip the transcoder check
    pub async fn new<P: AsRef<Path>>(config_path: P, skip_checks: bool) -> Result<Self, DaemonError> {
        let config = Config::load(config_path)?;
        Self::with_config(config, skip_checks).await
    }

    /// Initialize the daemon with an existing configuration
    pub async fn with_config(config: Config, skip_checks: bool) -> Result<Self, DaemonError> {
        run_startup_checks(&config, skip_checks)?;

        let views = ViewStore::open(&config.server.store_path)?;
        let plan = derive_plan(&config);
        let transcoder = FfmpegTranscoder::new(
            config.transcoder.program.clone(),
            plan.transcoder_threads,
            config.transcoder.timeout,
            config.thumbnailer.timeout,
        );

        Self::build(config, views, Arc::new(transcoder)).await
    }

    /// Assemble the daemon from already-opened parts
    ///
    /// A library path that cannot be registered or imported aborts startup;
    /// a path that cannot be watched is logged and skipped.
    pub async fn build(
        config: Config,
        views: ViewStore,
        transcoder: Arc<dyn Transcoder>,
    ) -> Result<Self, DaemonError> {
        let concurrency_plan = derive_plan(&config);
        let metrics = new_shared_metrics();

        let library = Arc::new(Library::new());
        for path in &config.library {
            let entry = library.add_path_entry(
                PathEntry::new(&path.path, path.prefix.as_str())
                    .with_preserve_upload_filename(path.preserve_upload_filename),
            )?;
            library.import_all(&entry.root)?;
        }

        let (reconciler, reconciler_task) = Reconciler::start(library.clone())?;
        let roots: Vec<_> = library.paths().into_iter().map(|p| p.root).collect();
        let watched = reconciler.watch_all(roots.iter().map(|r| r.as_path()));
        if watched < roots.len() {
            warn!(watched, total = roots.len(), "Some library paths are not watched");
        }

        let settings = IngestSettings::from_config(&config, &concurrency_plan);
        let pipeline = IngestPipeline::new(
            library.clone(),
            transcoder,
            Arc::new(DirectLink),
            settings,
            metrics.clone(),
        )?;

        {
            let mut snapshot = metrics.write().await;
            snapshot.library_videos = library.len();
            snapshot.touch();
        }

        info!(
            paths = roots.len(),
            videos = library.len(),
            max_concurrent_ingests = concurrency_plan.max_concurrent_ingests,
            transcoder_threads = concurrency_plan.transcoder_threads,
            "Daemon initialized"
        );

        Ok(Self {
            config,
            concurrency_plan,
            metrics,
            library,
            views: Arc::new(views),
            pipeline: Arc::new(pipeline),
            reconciler,
            reconciler_task,
        })
    }

    /// Handler state for the HTTP server
    pub fn state(&self) -> AppState {
        AppState {
            library: self.library.clone(),
            views: self.views.clone(),
            pipeline: self.pipeline.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Resolve the configured host and port.
    pub async fn listen_addr(&self) -> Result<SocketAddr, DaemonError> {
        let host_port = format!("{}:{}", self.config.server.host, self.config.server.port);
        let resolved = tokio::net::lookup_host(host_port.as_str())
            .await
            .map_err(|e| DaemonError::Address(format!("{}: {}", host_port, e)))?
            .next();
        resolved.ok_or(DaemonError::Address(host_port))
    }

    /// Register and watch a library path while running.
    pub fn add_library_path(&self, entry: PathEntry) -> Result<PathEntry, DaemonError> {
        let entry = self.library.add_path_entry(entry)?;
        self.library.import_all(&entry.root)?;
        if let Err(e) = self.reconciler.watch(&entry.root) {
            warn!(error = %e, "Directory not watched");
        }
        Ok(entry)
    }

    /// Stop watching a library path and drop every video it held.
    pub fn remove_library_path(&self, root: &Path) -> Option<PathEntry> {
        let entry = self.library.remove_path_entry(root)?;
        self.reconciler.unwatch(&entry.root);
        Some(entry)
    }

    /// Serve until Ctrl-C.
    pub async fn run(self) -> Result<(), DaemonError> {
        self.run_until(shutdown_signal()).await
    }

    /// Serve until `shutdown` resolves, then stop background work.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), DaemonError> {
        let addr = self.listen_addr().await?;
        let served = run_server(self.state(), addr, shutdown).await;

        info!("Shutting down");
        self.pipeline.close();
        let Daemon {
            reconciler,
            reconciler_task,
            views,
            ..
        } = self;
        drop(reconciler);
        if let Err(e) = reconciler_task.await {
            warn!(error = %e, "Reconciler task failed");
        }
        match Arc::try_unwrap(views) {
            Ok(views) => views.close(),
            Err(_) => warn!("View store still in use at shutdown"),
        }

        served.map_err(DaemonError::from)
    }
}

/// Resolves when the process receives Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
