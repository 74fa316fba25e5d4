//! FFmpeg transcoder module
//!
//! Provides functionality to build and execute FFmpeg commands for the three
//! operations the ingestion pipeline needs: normalizing a source into H.264/AAC
//! MP4, extracting a thumbnail frame, and producing resized variants.

use super::{Metadata, Transcoder};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Error type for transcoder invocations
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// Transcoder process exited with non-zero status
    #[error("Transcoder failed with exit code: {0}")]
    Failed(i32),

    /// Transcoder process was terminated by signal
    #[error("Transcoder process was terminated by signal")]
    Terminated,

    /// Transcoder exceeded its time budget and was killed
    #[error("Transcoder timed out after {0:?}")]
    TimedOut(Duration),

    /// IO error spawning or waiting on the process
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn metadata_args(cmd: &mut Command, metadata: &Metadata) {
    cmd.arg("-metadata").arg(format!("title={}", metadata.title));
    cmd.arg("-metadata").arg(format!("comment={}", metadata.comment));
}

fn thread_args(cmd: &mut Command, threads: u32) {
    if threads > 0 {
        cmd.arg("-threads").arg(threads.to_string());
    }
}

/// Build the command normalizing a source into H.264/AAC
pub fn build_transcode_command(
    program: &Path,
    input: &Path,
    output: &Path,
    metadata: &Metadata,
    threads: u32,
) -> Command {
    let mut cmd = Command::new(program);

    cmd.arg("-y");
    cmd.arg("-i").arg(input);
    cmd.arg("-vcodec").arg("h264");
    cmd.arg("-acodec").arg("aac");
    cmd.arg("-strict").arg("-2");
    cmd.arg("-loglevel").arg("quiet");
    thread_args(&mut cmd, threads);
    metadata_args(&mut cmd, metadata);
    cmd.arg(output);

    cmd
}

/// Build the command extracting one frame at `offset_secs`
pub fn build_thumbnail_command(
    program: &Path,
    input: &Path,
    output: &Path,
    offset_secs: u32,
) -> Command {
    let mut cmd = Command::new(program);

    cmd.arg("-y");
    cmd.arg("-ss").arg(offset_secs.to_string());
    cmd.arg("-i").arg(input);
    cmd.arg("-vf").arg("thumbnail");
    cmd.arg("-vframes").arg("1");
    cmd.arg("-strict").arg("-2");
    cmd.arg("-loglevel").arg("quiet");
    cmd.arg(output);

    cmd
}

/// Build the command producing a resized variant
pub fn build_resize_command(
    program: &Path,
    input: &Path,
    output: &Path,
    size: &str,
    metadata: &Metadata,
    threads: u32,
) -> Command {
    let mut cmd = Command::new(program);

    cmd.arg("-y");
    cmd.arg("-i").arg(input);
    cmd.arg("-s").arg(size);
    cmd.arg("-c:v").arg("libx264");
    cmd.arg("-c:a").arg("aac");
    cmd.arg("-crf").arg("18");
    cmd.arg("-strict").arg("-2");
    cmd.arg("-loglevel").arg("quiet");
    thread_args(&mut cmd, threads);
    metadata_args(&mut cmd, metadata);
    cmd.arg(output);

    cmd
}

/// Execute a transcoder command, bounded by `timeout`
///
/// The child is killed when the timeout expires, and also if the returned
/// future is dropped before completion.
///
/// # Returns
/// * `Ok(())` - Process exited with status 0
/// * `Err(TranscodeError)` - Spawn failure, non-zero exit, signal, or timeout
pub async fn run_command(mut cmd: Command, timeout: Option<Duration>) -> Result<(), TranscodeError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;

    let status = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(TranscodeError::TimedOut(limit));
            }
        },
        None => child.wait().await?,
    };

    if status.success() {
        Ok(())
    } else {
        match status.code() {
            Some(code) => Err(TranscodeError::Failed(code)),
            None => Err(TranscodeError::Terminated),
        }
    }
}

/// Transcoder backed by the `ffmpeg` executable
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
    threads: u32,
    transcode_timeout: Option<Duration>,
    thumbnail_timeout: Option<Duration>,
}

fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl FfmpegTranscoder {
    /// Create a transcoder
    ///
    /// # Arguments
    /// * `program` - Path or name of the ffmpeg executable
    /// * `threads` - Encoder threads per invocation (0 = let ffmpeg decide)
    /// * `transcode_timeout_secs` - Budget for transcode and resize (0 = unbounded)
    /// * `thumbnail_timeout_secs` - Budget for thumbnail extraction (0 = unbounded)
    pub fn new(
        program: PathBuf,
        threads: u32,
        transcode_timeout_secs: u64,
        thumbnail_timeout_secs: u64,
    ) -> Self {
        Self {
            program,
            threads,
            transcode_timeout: timeout_from_secs(transcode_timeout_secs),
            thumbnail_timeout: timeout_from_secs(thumbnail_timeout_secs),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        metadata: &Metadata,
    ) -> Result<(), TranscodeError> {
        let cmd = build_transcode_command(&self.program, input, output, metadata, self.threads);
        run_command(cmd, self.transcode_timeout).await
    }

    async fn thumbnail(
        &self,
        input: &Path,
        output: &Path,
        offset_secs: u32,
    ) -> Result<(), TranscodeError> {
        let cmd = build_thumbnail_command(&self.program, input, output, offset_secs);
        run_command(cmd, self.thumbnail_timeout).await
    }

    async fn resize(
        &self,
        input: &Path,
        output: &Path,
        size: &str,
        metadata: &Metadata,
    ) -> Result<(), TranscodeError> {
        let cmd =
            build_resize_command(&self.program, input, output, size, metadata, self.threads);
        run_command(cmd, self.transcode_timeout).await
    }
}
