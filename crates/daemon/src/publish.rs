//! Publisher module for moving prepared files to their final paths.
//!
//! Publishing is the moment a file becomes visible in a library root. The
//! thumbnail is always moved first so that anything reacting to the video's
//! appearance already finds its thumbnail in place. Neither move overwrites
//! an existing file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use thiserror::Error;

/// Errors that can occur while publishing.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Failed to move the thumbnail into place.
    #[error("Failed to publish thumbnail to {path}: {source}")]
    Thumbnail {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to move the video into place.
    #[error("Failed to publish video to {path}: {source}")]
    Video {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Outcome of a publish attempt.
#[derive(Debug)]
pub enum PublishOutcome {
    /// Both files are at their final paths.
    Published { video: PathBuf, thumbnail: PathBuf },
    /// A final path was taken; the temporaries are handed back untouched.
    Collision { video: TempPath, thumbnail: TempPath },
}

/// Move a prepared thumbnail and video to their final paths, thumbnail first.
///
/// If either final path already exists, nothing is left behind at the final
/// paths and both temporaries are returned for another attempt under a
/// different name.
///
/// # Arguments
///
/// * `video` - Temporary transcoded video
/// * `thumbnail` - Temporary thumbnail
/// * `final_video` - Destination of the video
/// * `final_thumbnail` - Destination of the thumbnail
pub fn publish(
    video: TempPath,
    thumbnail: TempPath,
    final_video: &Path,
    final_thumbnail: &Path,
) -> Result<PublishOutcome, PublishError> {
    let thumbnail_tmp = thumbnail.to_path_buf();

    if let Err(e) = thumbnail.persist_noclobber(final_thumbnail) {
        if e.error.kind() == io::ErrorKind::AlreadyExists {
            return Ok(PublishOutcome::Collision {
                video,
                thumbnail: e.path,
            });
        }
        return Err(PublishError::Thumbnail {
            path: final_thumbnail.to_path_buf(),
            source: e.error,
        });
    }

    match video.persist_noclobber(final_video) {
        Ok(()) => Ok(PublishOutcome::Published {
            video: final_video.to_path_buf(),
            thumbnail: final_thumbnail.to_path_buf(),
        }),
        Err(e) => {
            // Take the thumbnail back out of the root
            let restored = fs::rename(final_thumbnail, &thumbnail_tmp);
            if restored.is_err() {
                let _ = fs::remove_file(final_thumbnail);
            }

            if e.error.kind() == io::ErrorKind::AlreadyExists && restored.is_ok() {
                let thumbnail = TempPath::try_from_path(thumbnail_tmp).map_err(|source| {
                    PublishError::Thumbnail {
                        path: final_thumbnail.to_path_buf(),
                        source,
                    }
                })?;
                Ok(PublishOutcome::Collision {
                    video: e.path,
                    thumbnail,
                })
            } else {
                Err(PublishError::Video {
                    path: final_video.to_path_buf(),
                    source: e.error,
                })
            }
        }
    }
}
