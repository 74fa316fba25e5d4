//! Scanner module for discovering video files in library directories.
//!
//! This module owns the on-disk naming rules shared by the library index, the
//! reconciler and the ingestion pipeline: which files count as videos, how a
//! video id is derived from a file name, and where thumbnails and quality
//! variants live next to their canonical video.

use std::path::{Path, PathBuf};

/// Video file extensions supported by the scanner (case-insensitive matching).
pub const VIDEO_EXTENSIONS: &[&str] = &[
    ".mp4", ".m4v", ".mov", ".mkv", ".webm", ".avi", ".ts", ".m2ts",
];

/// Character separating a video stem from a variant suffix (`clip#360p.mp4`).
pub const VARIANT_MARKER: char = '#';

/// Extension of sidecar thumbnails written next to published videos.
pub const THUMBNAIL_EXTENSION: &str = "jpg";

/// Checks if a file has a video extension (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            VIDEO_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Checks if a file name carries the variant marker.
///
/// Variant files are renditions of another video and are never indexed on
/// their own.
pub fn is_variant_name(name: &str) -> bool {
    name.contains(VARIANT_MARKER)
}

/// Checks if the final component of `path` carries the variant marker.
pub fn is_variant_path(path: &Path) -> bool {
    path.file_name()
        .map(|name| is_variant_name(&name.to_string_lossy()))
        .unwrap_or(false)
}

/// Returns the file name without its last extension.
///
/// `clip.final.mp4` -> `clip.final`, `clip` -> `clip`.
pub fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) => &name[..idx],
        None => name,
    }
}

/// Derives the video id for a file name inside a root with the given prefix.
///
/// The id is the base name without extension, joined under the prefix when
/// the prefix is non-empty.
pub fn video_id(prefix: &str, file_name: &str) -> String {
    let stem = file_stem(file_name);
    if prefix.is_empty() {
        stem.to_string()
    } else {
        format!("{}/{}", prefix, stem)
    }
}

/// Constructs the sidecar thumbnail path for a given video file.
///
/// For example: `/media/clip.mp4` -> `/media/clip.jpg`
pub fn thumbnail_path(video_path: &Path) -> PathBuf {
    video_path.with_extension(THUMBNAIL_EXTENSION)
}

/// Constructs the path of a quality variant for a given video file.
///
/// For example: `/media/clip.mp4` + `360p` -> `/media/clip#360p.mp4`
pub fn variant_path(video_path: &Path, suffix: &str) -> PathBuf {
    let stem = video_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match video_path.extension() {
        Some(ext) => format!("{}{}{}.{}", stem, VARIANT_MARKER, suffix, ext.to_string_lossy()),
        None => format!("{}{}{}", stem, VARIANT_MARKER, suffix),
    };
    video_path.with_file_name(name)
}

/// Lists the files directly inside a library root that may hold videos.
///
/// This function:
/// - Reads the directory once, without descending into subdirectories
/// - Skips hidden files (names starting with `.`)
/// - Skips files whose name carries the variant marker
///
/// Whether a listed file actually parses as a video is decided later.
pub fn list_candidates(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    use walkdir::WalkDir;

    let mut candidates = Vec::new();

    for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            e.into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed"))
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') || is_variant_name(&name) {
            continue;
        }

        candidates.push(entry.path().to_path_buf());
    }

    candidates.sort();
    Ok(candidates)
}
