//! Transcoder driver for the ingestion pipeline
//!
//! The transcoder is an opaque external process. Exit code 0 means success;
//! a non-zero exit or a timeout means failure, and any output it may have
//! written is not to be trusted.

pub mod ffmpeg;

use async_trait::async_trait;
use std::path::Path;

pub use ffmpeg::{
    build_resize_command, build_thumbnail_command, build_transcode_command, run_command,
    FfmpegTranscoder, TranscodeError,
};

/// Metadata embedded into transcoded outputs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub title: String,
    pub comment: String,
}

impl Metadata {
    pub fn new(title: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            comment: comment.into(),
        }
    }
}

/// Contract of the external transcoder
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Normalize `input` into the canonical playback format at `output`.
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        metadata: &Metadata,
    ) -> Result<(), TranscodeError>;

    /// Extract a single frame `offset_secs` into `input` as an image at `output`.
    async fn thumbnail(
        &self,
        input: &Path,
        output: &Path,
        offset_secs: u32,
    ) -> Result<(), TranscodeError>;

    /// Re-encode `input` at the given dimension spec into `output`.
    async fn resize(
        &self,
        input: &Path,
        output: &Path,
        size: &str,
        metadata: &Metadata,
    ) -> Result<(), TranscodeError>;
}
