//! Ingestion pipeline for Reel
//!
//! Turns an uploaded or downloaded source into a published video, thumbnail
//! and quality variants inside a library root. Runs are limited by a
//! semaphore. Every intermediate file is a scoped temporary that is removed
//! when the run ends, whatever the outcome; only the published video and
//! thumbnail (and variants that succeeded) outlive it.

use crate::concurrency::ConcurrencyPlan;
use crate::config::{Config, VariantConfig};
use crate::encode::{Metadata, TranscodeError, Transcoder};
use crate::fetch::{Downloader, FetchError, RemoteSource};
use crate::library::{normalize_path, Library, PathEntry};
use crate::metrics::{IngestMetrics, SharedMetrics};
use crate::naming::{collision_stem, sanitize_stem, secure_join, short_id, NameError};
use crate::publish::{publish, PublishError, PublishOutcome};
use crate::scan::{is_variant_name, variant_path, THUMBNAIL_EXTENSION};
use crate::size_gate::{check_size_limit, SizeGateResult};
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{Builder, NamedTempFile, TempPath};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

/// Name prefix of temporaries; hidden so library scans and the reconciler skip them
pub const TEMP_PREFIX: &str = ".reel-";

/// Upper bound on name candidates tried before giving up
pub const MAX_NAME_ATTEMPTS: usize = 16;

/// Extension of published videos (the transcoder always produces MP4)
pub const VIDEO_EXTENSION: &str = "mp4";

/// A quality variant: dimension spec and file-name suffix
pub type Variant = VariantConfig;

/// Pipeline stage, used for error reporting and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    StageInput,
    AllocateTarget,
    Transcode,
    Thumbnail,
    NameResolution,
    CollisionAvoidance,
    Publish,
    Variants,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::StageInput => "stage_input",
            Stage::AllocateTarget => "allocate_target",
            Stage::Transcode => "transcode",
            Stage::Thumbnail => "thumbnail",
            Stage::NameResolution => "name_resolution",
            Stage::CollisionAvoidance => "collision_avoidance",
            Stage::Publish => "publish",
            Stage::Variants => "variants",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error taxonomy used for status mapping at the request boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Resource,
    ExternalProcess,
    Network,
    SizeExceeded,
}

/// Error type for ingestion runs
#[derive(Debug, Error)]
pub enum IngestError {
    /// Bad or missing request field
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Target directory is not a registered library root
    #[error("Unknown library path: {0}")]
    UnknownTarget(PathBuf),

    /// Source size unknown or above the ceiling
    #[error("Source exceeds the size limit of {limit} bytes")]
    SizeExceeded { actual: Option<u64>, limit: u64 },

    /// Temporary file or disk failure
    #[error("IO error during {stage}: {source}")]
    Io {
        stage: Stage,
        #[source]
        source: io::Error,
    },

    /// Transcoder failed or timed out
    #[error("Transcode failed: {0}")]
    TranscodeFailed(#[source] TranscodeError),

    /// Thumbnail extraction failed or timed out
    #[error("Thumbnail extraction failed: {0}")]
    ThumbnailFailed(#[source] TranscodeError),

    /// Remote resolution or download failed
    #[error("Fetch failed during {stage}: {source}")]
    Fetch {
        stage: Stage,
        #[source]
        source: FetchError,
    },

    /// A computed name would leave the library root
    #[error("Unsafe file name: {0}")]
    UnsafeName(#[from] NameError),

    /// Every candidate name was taken
    #[error("No free file name after {0} attempts")]
    NameExhausted(usize),

    /// Moving files to their final paths failed
    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    /// The pipeline no longer accepts runs
    #[error("Ingestion pipeline is closed")]
    Closed,
}

impl IngestError {
    /// Taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Validation(_)
            | IngestError::UnknownTarget(_)
            | IngestError::UnsafeName(_) => ErrorKind::Validation,
            IngestError::SizeExceeded { .. } => ErrorKind::SizeExceeded,
            IngestError::TranscodeFailed(_) | IngestError::ThumbnailFailed(_) => {
                ErrorKind::ExternalProcess
            }
            IngestError::Fetch { source, .. } => match source {
                FetchError::InvalidUrl(_) => ErrorKind::Validation,
                FetchError::TooLarge { .. } => ErrorKind::SizeExceeded,
                FetchError::Io(_) => ErrorKind::Resource,
                FetchError::Request(_) | FetchError::Status { .. } => ErrorKind::Network,
            },
            IngestError::Io { .. }
            | IngestError::NameExhausted(_)
            | IngestError::Publish(_)
            | IngestError::Closed => ErrorKind::Resource,
        }
    }

    /// Stage at which the run stopped.
    pub fn stage(&self) -> Stage {
        match self {
            IngestError::Validation(_)
            | IngestError::UnknownTarget(_)
            | IngestError::SizeExceeded { .. }
            | IngestError::Closed => Stage::StageInput,
            IngestError::Io { stage, .. } | IngestError::Fetch { stage, .. } => *stage,
            IngestError::TranscodeFailed(_) => Stage::Transcode,
            IngestError::ThumbnailFailed(_) => Stage::Thumbnail,
            IngestError::UnsafeName(_) => Stage::NameResolution,
            IngestError::NameExhausted(_) => Stage::CollisionAvoidance,
            IngestError::Publish(_) => Stage::Publish,
        }
    }
}

fn io_err(stage: Stage) -> impl FnOnce(io::Error) -> IngestError {
    move |source| IngestError::Io { stage, source }
}

fn fetch_err(stage: Stage) -> impl FnOnce(FetchError) -> IngestError {
    move |source| match source {
        FetchError::TooLarge { limit, .. } => IngestError::SizeExceeded {
            actual: None,
            limit,
        },
        source => IngestError::Fetch { stage, source },
    }
}

/// Create a hidden temporary file in `dir`.
fn temp_file(dir: &Path, suffix: &str, stage: Stage) -> Result<NamedTempFile, IngestError> {
    Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(suffix)
        .tempfile_in(dir)
        .map_err(io_err(stage))
}

/// Pipeline settings
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Directory holding staged uploads and downloads
    pub staging_dir: PathBuf,
    /// Ceiling on uploaded or downloaded source size
    pub max_source_bytes: u64,
    /// Keep client file names for every root
    pub preserve_upload_filename: bool,
    /// Seconds into the video at which the thumbnail is taken
    pub thumbnail_offset_secs: u32,
    /// Variants in generation order
    pub variants: Vec<Variant>,
    /// Maximum concurrent runs
    pub max_concurrent: usize,
}

impl IngestSettings {
    pub fn from_config(cfg: &Config, plan: &ConcurrencyPlan) -> Self {
        Self {
            staging_dir: cfg.server.upload_path.clone(),
            max_source_bytes: cfg.server.max_upload_size,
            preserve_upload_filename: cfg.server.preserve_upload_filename,
            thumbnail_offset_secs: cfg.thumbnailer.position_from_start,
            variants: cfg.transcoder.variants.clone(),
            max_concurrent: plan.max_concurrent_ingests as usize,
        }
    }
}

/// Source blob staged on disk
#[derive(Debug)]
pub struct StagedInput {
    path: TempPath,
    original_name: String,
    size_bytes: u64,
}

impl StagedInput {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Client file name or remote title
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

/// An upload being streamed to the staging directory
///
/// Dropping it before [`UploadStaging::finish`] removes the staged bytes.
#[derive(Debug)]
pub struct UploadStaging {
    file: tokio::fs::File,
    path: TempPath,
    original_name: String,
    written: u64,
    limit: u64,
}

impl UploadStaging {
    /// Append a chunk, enforcing the size ceiling.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), IngestError> {
        let total = self.written + chunk.len() as u64;
        if let SizeGateResult::Reject {
            actual_bytes,
            limit_bytes,
        } = check_size_limit(Some(total), self.limit)
        {
            return Err(IngestError::SizeExceeded {
                actual: actual_bytes,
                limit: limit_bytes,
            });
        }
        self.file
            .write_all(chunk)
            .await
            .map_err(io_err(Stage::StageInput))?;
        self.written = total;
        Ok(())
    }

    /// Bytes staged so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Close the staging file.
    pub async fn finish(self) -> Result<StagedInput, IngestError> {
        let UploadStaging {
            mut file,
            path,
            original_name,
            written,
            ..
        } = self;

        if written == 0 {
            return Err(IngestError::Validation("empty video file".to_string()));
        }
        file.flush().await.map_err(io_err(Stage::StageInput))?;

        Ok(StagedInput {
            path,
            original_name,
            size_bytes: written,
        })
    }
}

/// One pipeline run's inputs
#[derive(Debug)]
pub struct IngestionJob {
    pub source: StagedInput,
    pub target: PathEntry,
    pub title: String,
    pub description: String,
    /// Pre-fetched thumbnail inside the target root; skips extraction
    pub thumbnail: Option<TempPath>,
    pub variants: Vec<Variant>,
}

/// Result of one variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantOutcome {
    pub suffix: String,
    pub size: String,
    pub path: PathBuf,
    pub error: Option<String>,
}

impl VariantOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub id: String,
    pub video: PathBuf,
    pub thumbnail: PathBuf,
    pub variants: Vec<VariantOutcome>,
}

impl IngestReport {
    pub fn failed_variants(&self) -> usize {
        self.variants.iter().filter(|v| !v.is_ok()).count()
    }
}

fn is_taken(path: &Path) -> Result<bool, IngestError> {
    match std::fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(IngestError::Io {
            stage: Stage::CollisionAvoidance,
            source: e,
        }),
    }
}

/// Find a free name under `root` and publish both files under it.
///
/// # Returns
/// The chosen stem with the final video and thumbnail paths
fn publish_unique(
    root: &Path,
    base: &str,
    mut video: TempPath,
    mut thumbnail: TempPath,
) -> Result<(String, PathBuf, PathBuf), IngestError> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let stem = if attempt == 0 {
            base.to_string()
        } else {
            collision_stem(base)
        };
        let final_video = secure_join(root, &format!("{}.{}", stem, VIDEO_EXTENSION))?;
        let final_thumbnail = secure_join(root, &format!("{}.{}", stem, THUMBNAIL_EXTENSION))?;

        if is_taken(&final_video)? || is_taken(&final_thumbnail)? {
            warn!(path = %final_video.display(), "File name taken, picking another");
            continue;
        }

        match publish(video, thumbnail, &final_video, &final_thumbnail)? {
            PublishOutcome::Published {
                video: published_video,
                thumbnail: published_thumbnail,
            } => return Ok((stem, published_video, published_thumbnail)),
            PublishOutcome::Collision {
                video: returned_video,
                thumbnail: returned_thumbnail,
            } => {
                warn!(path = %final_video.display(), "Lost publish race, picking another name");
                video = returned_video;
                thumbnail = returned_thumbnail;
            }
        }
    }

    Err(IngestError::NameExhausted(MAX_NAME_ATTEMPTS))
}

/// Ingestion pipeline shared by all request handlers
pub struct IngestPipeline {
    library: Arc<Library>,
    transcoder: Arc<dyn Transcoder>,
    remote: Arc<dyn RemoteSource>,
    downloader: Downloader,
    settings: IngestSettings,
    semaphore: Arc<Semaphore>,
    metrics: SharedMetrics,
}

impl IngestPipeline {
    /// Create a new pipeline
    ///
    /// # Arguments
    /// * `library` - Index that published videos are added to
    /// * `transcoder` - External transcoder driver
    /// * `remote` - Resolver for import URLs
    /// * `settings` - Limits, variants and staging directory
    /// * `metrics` - Shared metrics state for in-flight runs and counters
    pub fn new(
        library: Arc<Library>,
        transcoder: Arc<dyn Transcoder>,
        remote: Arc<dyn RemoteSource>,
        settings: IngestSettings,
        metrics: SharedMetrics,
    ) -> Result<Self, IngestError> {
        let downloader =
            Downloader::new(settings.max_source_bytes).map_err(fetch_err(Stage::StageInput))?;
        let permits = settings.max_concurrent.max(1);
        Ok(Self {
            library,
            transcoder,
            remote,
            downloader,
            settings,
            semaphore: Arc::new(Semaphore::new(permits)),
            metrics,
        })
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    /// Suffixes of the configured variants
    pub fn known_suffixes(&self) -> Vec<String> {
        self.settings
            .variants
            .iter()
            .map(|v| v.suffix.clone())
            .collect()
    }

    /// Get the number of free run slots
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit, IngestError> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| IngestError::Closed)
    }

    /// Stop accepting new runs; runs already holding a slot finish.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Resolve the target root named by a request, or the default root.
    ///
    /// The default is the first registered root in path order.
    pub fn resolve_target(&self, target: Option<&str>) -> Result<PathEntry, IngestError> {
        match target.map(str::trim).filter(|t| !t.is_empty()) {
            Some(target) => {
                let root = normalize_path(Path::new(target))
                    .map_err(|_| IngestError::UnknownTarget(PathBuf::from(target)))?;
                self.library
                    .path_entry(&root)
                    .ok_or(IngestError::UnknownTarget(root))
            }
            None => self
                .library
                .paths()
                .into_iter()
                .next()
                .ok_or_else(|| IngestError::Validation("no library paths registered".into())),
        }
    }

    /// Start staging an upload.
    ///
    /// # Arguments
    /// * `file_name` - Client-supplied file name, used only for naming
    pub async fn begin_upload(&self, file_name: &str) -> Result<UploadStaging, IngestError> {
        tokio::fs::create_dir_all(&self.settings.staging_dir)
            .await
            .map_err(io_err(Stage::StageInput))?;
        let (file, path) =
            temp_file(&self.settings.staging_dir, "", Stage::StageInput)?.into_parts();

        Ok(UploadStaging {
            file: tokio::fs::File::from_std(file),
            path,
            original_name: file_name.to_string(),
            written: 0,
            limit: self.settings.max_source_bytes,
        })
    }

    /// Ingest a staged upload.
    ///
    /// An empty title falls back to the client file name.
    pub async fn upload(
        &self,
        source: StagedInput,
        target: Option<&str>,
        title: &str,
        description: &str,
    ) -> Result<IngestReport, IngestError> {
        let target = self.resolve_target(target)?;
        let title = match title.trim() {
            "" => source.original_name.clone(),
            title => title.to_string(),
        };

        self.ingest(IngestionJob {
            source,
            target,
            title,
            description: description.trim().to_string(),
            thumbnail: None,
            variants: self.settings.variants.clone(),
        })
        .await
    }

    /// Download and ingest a remote video.
    pub async fn import(&self, url: &str, target: Option<&str>) -> Result<IngestReport, IngestError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(IngestError::Validation("missing url".into()));
        }
        let target = self.resolve_target(target)?;
        let remote = self
            .remote
            .resolve(url)
            .await
            .map_err(fetch_err(Stage::StageInput))?;

        let source = self
            .download(&remote.video_url, &self.settings.staging_dir, "", &remote.title)
            .await?;
        let thumbnail = match &remote.thumbnail_url {
            Some(thumbnail_url) => {
                let suffix = format!(".{}", THUMBNAIL_EXTENSION);
                let staged = self
                    .download(thumbnail_url, &target.root, &suffix, &remote.title)
                    .await?;
                Some(staged.path)
            }
            None => None,
        };

        self.ingest(IngestionJob {
            source,
            target,
            title: remote.title,
            description: remote.description,
            thumbnail,
            variants: self.settings.variants.clone(),
        })
        .await
    }

    /// Probe, size-check and download `url` into a temporary in `dir`.
    async fn download(
        &self,
        url: &str,
        dir: &Path,
        suffix: &str,
        name: &str,
    ) -> Result<StagedInput, IngestError> {
        let length = self
            .downloader
            .probe_length(url)
            .await
            .map_err(fetch_err(Stage::StageInput))?;
        if let SizeGateResult::Reject {
            actual_bytes,
            limit_bytes,
        } = check_size_limit(length, self.settings.max_source_bytes)
        {
            warn!(url, ?actual_bytes, limit_bytes, "Refusing remote source");
            return Err(IngestError::SizeExceeded {
                actual: actual_bytes,
                limit: limit_bytes,
            });
        }

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(io_err(Stage::StageInput))?;
        let path = temp_file(dir, suffix, Stage::StageInput)?.into_temp_path();
        let size_bytes = self
            .downloader
            .download_to(url, &path, length)
            .await
            .map_err(fetch_err(Stage::StageInput))?;

        Ok(StagedInput {
            path,
            original_name: name.to_string(),
            size_bytes,
        })
    }

    /// Run a job through the pipeline
    ///
    /// Waits for a free run slot, then executes the stages in order:
    /// 1. Allocates the transcode target
    /// 2. Transcodes the staged source
    /// 3. Extracts the thumbnail (unless one was supplied)
    /// 4. Resolves the final name
    /// 5. Avoids collisions and publishes, thumbnail first
    /// 6. Generates variants, best-effort
    ///
    /// # Returns
    /// * `Ok(IngestReport)` - Video published; per-variant outcomes inside
    /// * `Err(IngestError)` - Run aborted; no temporaries left behind
    pub async fn ingest(&self, job: IngestionJob) -> Result<IngestReport, IngestError> {
        let _permit = self.acquire_permit().await?;

        let run_id = short_id();
        let source_bytes = job.source.size_bytes;
        self.track(&run_id, &job).await;

        let result = self.run(&run_id, job).await;
        match &result {
            Ok(report) => info!(
                run_id = %run_id,
                id = %report.id,
                path = %report.video.display(),
                failed_variants = report.failed_variants(),
                "Ingest complete"
            ),
            Err(e) => error!(run_id = %run_id, stage = %e.stage(), error = %e, "Ingest failed"),
        }

        self.complete(&run_id, &result, source_bytes).await;
        result
    }

    async fn run(&self, run_id: &str, job: IngestionJob) -> Result<IngestReport, IngestError> {
        let IngestionJob {
            source,
            target,
            title,
            description,
            thumbnail,
            variants,
        } = job;
        let metadata = Metadata::new(title, description);
        let root = target.root.clone();

        self.enter(run_id, Stage::AllocateTarget).await;
        let video_suffix = format!(".{}", VIDEO_EXTENSION);
        let video_tmp = temp_file(&root, &video_suffix, Stage::AllocateTarget)?.into_temp_path();

        self.enter(run_id, Stage::Transcode).await;
        self.transcoder
            .transcode(source.path(), &video_tmp, &metadata)
            .await
            .map_err(IngestError::TranscodeFailed)?;

        let thumbnail_tmp = match thumbnail {
            Some(thumbnail) => thumbnail,
            None => {
                self.enter(run_id, Stage::Thumbnail).await;
                let thumbnail_suffix = format!(".{}", THUMBNAIL_EXTENSION);
                let thumbnail_tmp =
                    temp_file(&root, &thumbnail_suffix, Stage::Thumbnail)?.into_temp_path();
                self.transcoder
                    .thumbnail(
                        &video_tmp,
                        &thumbnail_tmp,
                        self.settings.thumbnail_offset_secs,
                    )
                    .await
                    .map_err(IngestError::ThumbnailFailed)?;
                thumbnail_tmp
            }
        };

        self.enter(run_id, Stage::NameResolution).await;
        let preserve = self.settings.preserve_upload_filename || target.preserve_upload_filename;
        let base = if preserve {
            match sanitize_stem(source.original_name()) {
                stem if stem.is_empty() => short_id(),
                stem => stem,
            }
        } else {
            short_id()
        };

        self.enter(run_id, Stage::Publish).await;
        let (stem, video, thumbnail) = publish_unique(&root, &base, video_tmp, thumbnail_tmp)?;
        let id = target.video_id(&format!("{}.{}", stem, VIDEO_EXTENSION));
        info!(run_id, id = %id, path = %video.display(), "Published");

        self.index(&video).await;

        self.enter(run_id, Stage::Variants).await;
        let mut outcomes = Vec::with_capacity(variants.len());
        for variant in &variants {
            let outcome = self.make_variant(&root, &video, variant, &metadata).await;
            if let Some(error) = &outcome.error {
                warn!(run_id, id = %id, suffix = %variant.suffix, error = %error, "Variant failed");
            }
            outcomes.push(outcome);
        }

        Ok(IngestReport {
            id,
            video,
            thumbnail,
            variants: outcomes,
        })
    }

    /// Add a freshly published video to the index.
    ///
    /// The reconciler will see the same file; adding is idempotent.
    async fn index(&self, video: &Path) {
        let library = self.library.clone();
        let path = video.to_path_buf();
        match tokio::task::spawn_blocking(move || library.add(&path)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(path = %video.display(), error = %e, "Published video not indexed"),
            Err(e) => warn!(path = %video.display(), error = %e, "Index task failed"),
        }
    }

    async fn make_variant(
        &self,
        root: &Path,
        video: &Path,
        variant: &Variant,
        metadata: &Metadata,
    ) -> VariantOutcome {
        let path = variant_path(video, &variant.suffix);
        let error = self
            .try_variant(root, video, &path, variant, metadata)
            .await
            .err();

        VariantOutcome {
            suffix: variant.suffix.clone(),
            size: variant.size.clone(),
            path,
            error,
        }
    }

    async fn try_variant(
        &self,
        root: &Path,
        video: &Path,
        path: &Path,
        variant: &Variant,
        metadata: &Metadata,
    ) -> Result<(), String> {
        let suffix = &variant.suffix;
        if suffix.is_empty() || is_variant_name(suffix) || suffix.contains(['/', '\\']) {
            return Err(format!("invalid variant suffix '{}'", suffix));
        }
        if path.parent() != Some(root) {
            return Err(format!("variant path escapes root: {}", path.display()));
        }

        let video_suffix = format!(".{}", VIDEO_EXTENSION);
        let tmp = temp_file(root, &video_suffix, Stage::Variants)
            .map_err(|e| e.to_string())?
            .into_temp_path();
        self.transcoder
            .resize(video, &tmp, &variant.size, metadata)
            .await
            .map_err(|e| e.to_string())?;
        if let Err(e) = tmp.persist_noclobber(path) {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                warn!(path = %path.display(), "Variant skipped, file already exists");
                return Err(format!("variant already exists: {}", path.display()));
            }
            return Err(e.error.to_string());
        }
        debug!(path = %path.display(), "Variant written");
        Ok(())
    }

    async fn track(&self, run_id: &str, job: &IngestionJob) {
        let mut metrics = self.metrics.write().await;
        metrics.ingests.push(IngestMetrics {
            run_id: run_id.to_string(),
            source: job.source.original_name.clone(),
            stage: Stage::StageInput.as_str().to_string(),
            source_bytes: job.source.size_bytes,
        });
        metrics.touch();
    }

    async fn enter(&self, run_id: &str, stage: Stage) {
        debug!(run_id, stage = %stage, "Entering stage");
        let mut metrics = self.metrics.write().await;
        metrics.set_stage(run_id, stage.as_str());
    }

    async fn complete(
        &self,
        run_id: &str,
        result: &Result<IngestReport, IngestError>,
        source_bytes: u64,
    ) {
        let mut metrics = self.metrics.write().await;
        metrics.finish(run_id);
        match result {
            Ok(report) => {
                metrics.completed_ingests += 1;
                metrics.total_bytes_ingested += source_bytes;
                metrics.failed_variants += report.failed_variants() as u64;
            }
            Err(_) => metrics.failed_ingests += 1,
        }
        metrics.library_videos = self.library.len();
        metrics.touch();
    }
}
