//! Startup checks module for Reel
//!
//! Preflight checks run before the daemon starts serving:
//! - The configured transcoder program answers `-version`
//! - The upload staging directory and the view store's directory exist

use crate::config::Config;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{info, warn};

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Transcoder not available: {0}")]
    TranscoderUnavailable(String),

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 8.0 ..."
/// - N-prefixed: "ffmpeg version n8.0-... ..."
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    let version_str = version_part.trim_start_matches('n');

    // Major version is everything before the first '.' or '-'
    let major_str = version_str.split(['.', '-']).next()?;

    major_str.parse().ok()
}

/// Check that the transcoder runs, by invoking `<program> -version`
///
/// # Returns
/// * `Ok(Some(major))` - FFmpeg answered with a parseable version
/// * `Ok(None)` - The program ran but did not report an FFmpeg version
/// * `Err(StartupError)` - The program is missing or exited non-zero
pub fn check_transcoder_available(program: &Path) -> Result<Option<u32>, StartupError> {
    let output = Command::new(program)
        .arg("-version")
        .output()
        .map_err(|e| {
            StartupError::TranscoderUnavailable(format!(
                "{} -version failed; is it installed and in PATH? Error: {}",
                program.display(),
                e
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::TranscoderUnavailable(format!(
            "{} -version exited with {}",
            program.display(),
            output.status
        )));
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    let major = parse_ffmpeg_version(&version_output);
    match major {
        Some(major) => info!(program = %program.display(), major, "Transcoder available"),
        None => warn!(
            program = %program.display(),
            first_line = version_output.lines().next().unwrap_or("(empty)"),
            "Transcoder did not report an FFmpeg version"
        ),
    }
    Ok(major)
}

/// Create `path` (and parents) if it does not exist yet.
pub fn ensure_dir(path: &Path) -> Result<(), StartupError> {
    std::fs::create_dir_all(path).map_err(|source| StartupError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Run all startup checks in order
///
/// Checks are run in the following order:
/// 1. Upload staging directory
/// 2. View store directory
/// 3. Transcoder availability (unless `skip_transcoder_check`)
pub fn run_startup_checks(cfg: &Config, skip_transcoder_check: bool) -> Result<(), StartupError> {
    ensure_dir(&cfg.server.upload_path)?;
    if let Some(parent) = cfg.server.store_path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }

    if skip_transcoder_check {
        warn!("Skipping transcoder check");
    } else {
        check_transcoder_available(&cfg.transcoder.program)?;
    }
    Ok(())
}
