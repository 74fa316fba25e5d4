//! Reel
//!
//! Video library service: indexes media files in registered directories,
//! follows filesystem changes, ingests uploads and remote imports through an
//! external transcoder, and counts views.

pub mod concurrency;
pub mod daemon;
pub mod encode;
pub mod fetch;
pub mod ingest;
pub mod library;
pub mod metrics;
pub mod naming;
pub mod probe;
pub mod publish;
pub mod reconcile;
pub mod scan;
pub mod server;
pub mod size_gate;
pub mod startup;
pub mod views;

#[cfg(test)]
mod testing;

pub use reel_config as config;
pub use reel_config::Config;
pub use concurrency::{derive_plan, ConcurrencyPlan};
pub use daemon::{shutdown_signal, Daemon, DaemonError};
pub use encode::{FfmpegTranscoder, Metadata, TranscodeError, Transcoder};
pub use fetch::{DirectLink, Downloader, FetchError, RemoteSource, RemoteVideo};
pub use ingest::{
    ErrorKind, IngestError, IngestPipeline, IngestReport, IngestSettings, IngestionJob, Stage,
    StagedInput, UploadStaging, VariantOutcome,
};
pub use library::{ImportSummary, Library, LibraryError, PathEntry, SortOrder, Video};
pub use metrics::{new_shared_metrics, IngestMetrics, MetricsSnapshot, SharedMetrics};
pub use reconcile::{ReconcileError, ReconcileEvent, Reconciler};
pub use server::{create_router, run_server, AppState, ServerError};
pub use startup::{check_transcoder_available, parse_ffmpeg_version, run_startup_checks, StartupError};
pub use views::{KvStore, MemoryStore, RedbStore, StoreError, ViewStore};
