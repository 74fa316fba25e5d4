//! Library index: the path registry and the id -> video map.
//!
//! Both maps live behind a single reader/writer lock so that a reader never
//! observes a video whose root has been unregistered.

use crate::probe::{probe_file, ProbeError, Thumbnail};
use crate::scan::{
    is_variant_name, is_variant_path, list_candidates, thumbnail_path, variant_path, video_id,
};
use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised by library index operations
#[derive(Debug, Error)]
pub enum LibraryError {
    /// Another entry already uses this root
    #[error("Duplicate (normalized) library path: {0}")]
    DuplicateRoot(PathBuf),

    /// Another entry already uses this prefix
    #[error("Duplicate library prefix: '{0}'")]
    DuplicatePrefix(String),

    /// Prefix cannot be used as an id namespace
    #[error("Invalid library prefix: '{0}'")]
    InvalidPrefix(String),

    /// The file's directory is not a registered root
    #[error("Path not registered in library: {0}")]
    PathNotRegistered(PathBuf),

    /// The file is a quality variant of another video
    #[error("Variant files are not indexed: {0}")]
    VariantFile(PathBuf),

    /// The root directory could not be created
    #[error("Failed to create library path {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file could not be parsed as a video
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ProbeError,
    },

    /// The file was deleted while it was being parsed
    #[error("File vanished before it was indexed: {0}")]
    Vanished(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A registered library root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    /// Absolute, lexically normalized root directory
    pub root: PathBuf,
    /// Id namespace for videos under this root (may be empty)
    pub prefix: String,
    /// Keep the client's file name for uploads into this root
    pub preserve_upload_filename: bool,
}

impl PathEntry {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
            preserve_upload_filename: false,
        }
    }

    pub fn with_preserve_upload_filename(mut self, preserve: bool) -> Self {
        self.preserve_upload_filename = preserve;
        self
    }

    /// Id of the video stored in this root under `file_name`.
    pub fn video_id(&self, file_name: &str) -> String {
        video_id(&self.prefix, file_name)
    }
}

/// An indexed video
#[derive(Debug, Clone, PartialEq)]
pub struct Video {
    pub id: String,
    /// Canonical media file
    pub path: PathBuf,
    pub title: String,
    pub description: String,
    pub album: Option<String>,
    pub thumbnail: Option<Arc<Thumbnail>>,
    /// Modification time of the media file
    pub timestamp: SystemTime,
    pub size_bytes: u64,
    /// Filled in from the view store at read time; not canonical here
    pub views: u64,
}

impl Video {
    /// Select the file to serve for a requested playback quality.
    ///
    /// Falls back to the canonical file when the quality is empty, not one of
    /// `known_suffixes`, malformed, or its variant file does not exist.
    pub fn playback_path(&self, quality: &str, known_suffixes: &[String]) -> PathBuf {
        if quality.is_empty() {
            return self.path.clone();
        }

        let valid = known_suffixes.iter().any(|s| s == quality)
            && !is_variant_name(quality)
            && !quality.contains(['/', '\\']);
        if !valid {
            warn!(quality, "invalid quality");
            return self.path.clone();
        }

        let candidate = variant_path(&self.path, quality);
        if candidate.is_file() {
            candidate
        } else {
            warn!(
                quality,
                video_path = %candidate.display(),
                "video with specified quality does not exist (defaulting to default quality)"
            );
            self.path.clone()
        }
    }
}

/// Playlist ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Newest first
    #[default]
    Timestamp,
    /// Most viewed first
    Views,
}

impl SortOrder {
    /// Parse a sort criterion from a query value (`""`, `timestamp`, `views`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "" | "timestamp" => Some(SortOrder::Timestamp),
            "views" => Some(SortOrder::Views),
            _ => None,
        }
    }
}

/// Sort videos in place by the given order.
pub fn sort_videos(videos: &mut [Video], order: SortOrder) {
    match order {
        SortOrder::Timestamp => videos.sort_by(|a, b| {
            b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id))
        }),
        SortOrder::Views => videos.sort_by(|a, b| {
            b.views
                .cmp(&a.views)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| a.id.cmp(&b.id))
        }),
    }
}

/// Summary of a directory import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

/// Lexically normalize a path into an absolute path.
///
/// `.` components are dropped and `..` pops the previous component; symlinks
/// are not resolved.
pub fn normalize_path(path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(name) => normalized.push(name),
        }
    }
    Ok(normalized)
}

fn validate_prefix(prefix: &str) -> Result<(), LibraryError> {
    if prefix.is_empty() {
        return Ok(());
    }
    let bad = is_variant_name(prefix)
        || prefix.starts_with('/')
        || prefix.ends_with('/')
        || prefix.contains('\\')
        || prefix.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(LibraryError::InvalidPrefix(prefix.to_string()));
    }
    Ok(())
}

/// Parse a media file under `entry` into a video record.
pub fn parse_video(entry: &PathEntry, path: &Path) -> Result<Video, ProbeError> {
    let info = probe_file(path)?;
    let metadata = std::fs::metadata(path)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let thumbnail = match info.cover {
        Some(cover) => Some(cover),
        None => {
            let sidecar = thumbnail_path(path);
            match std::fs::read(&sidecar) {
                Ok(data) => Some(Thumbnail {
                    data,
                    mime: "image/jpeg".to_string(),
                }),
                Err(_) => None,
            }
        }
    };

    Ok(Video {
        id: entry.video_id(&file_name),
        path: path.to_path_buf(),
        title: info
            .title
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| file_name.clone()),
        description: info.description.unwrap_or_default(),
        album: info.album,
        thumbnail: thumbnail.map(Arc::new),
        timestamp: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        size_bytes: info.size_bytes,
        views: 0,
    })
}

#[derive(Debug, Default)]
struct LibraryState {
    paths: HashMap<PathBuf, PathEntry>,
    videos: HashMap<String, Video>,
}

/// Concurrent library index
#[derive(Debug, Default)]
pub struct Library {
    state: RwLock<LibraryState>,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, LibraryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LibraryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a library root.
    ///
    /// The root is normalized, checked against existing roots and prefixes,
    /// and created if absent. On failure the registry is left unchanged.
    ///
    /// # Returns
    /// The registered (normalized) entry
    pub fn add_path_entry(&self, entry: PathEntry) -> Result<PathEntry, LibraryError> {
        validate_prefix(&entry.prefix)?;
        let entry = PathEntry {
            root: normalize_path(&entry.root)?,
            ..entry
        };

        let mut state = self.write();
        for existing in state.paths.values() {
            if existing.root == entry.root {
                return Err(LibraryError::DuplicateRoot(entry.root));
            }
            if existing.prefix == entry.prefix {
                return Err(LibraryError::DuplicatePrefix(entry.prefix));
            }
        }

        std::fs::create_dir_all(&entry.root).map_err(|source| LibraryError::CreateDir {
            path: entry.root.clone(),
            source,
        })?;

        state.paths.insert(entry.root.clone(), entry.clone());
        info!(root = %entry.root.display(), prefix = %entry.prefix, "Registered library path");
        Ok(entry)
    }

    /// Unregister a library root, dropping every video it owned.
    pub fn remove_path_entry(&self, root: &Path) -> Option<PathEntry> {
        let root = normalize_path(root).ok()?;
        let mut state = self.write();
        let entry = state.paths.remove(&root)?;
        state
            .videos
            .retain(|_, video| video.path.parent() != Some(root.as_path()));
        info!(root = %root.display(), "Unregistered library path");
        Some(entry)
    }

    /// Index every video directly inside a registered root.
    ///
    /// Files carrying the variant marker are skipped, and a file that fails
    /// to parse is skipped without affecting the rest of the import.
    pub fn import_all(&self, root: &Path) -> Result<ImportSummary, LibraryError> {
        let root = normalize_path(root)?;
        if self.path_entry(&root).is_none() {
            return Err(LibraryError::PathNotRegistered(root));
        }

        let mut summary = ImportSummary::default();
        for path in list_candidates(&root)? {
            match self.add(&path) {
                Ok(_) => summary.imported += 1,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Skipping file during import");
                    summary.skipped += 1;
                }
            }
        }

        info!(
            root = %root.display(),
            imported = summary.imported,
            skipped = summary.skipped,
            "Imported library path"
        );
        Ok(summary)
    }

    /// Index (or re-index) a single file.
    ///
    /// Re-adding a path replaces its previous record.
    pub fn add(&self, path: &Path) -> Result<Video, LibraryError> {
        let path = normalize_path(path)?;
        if is_variant_path(&path) {
            return Err(LibraryError::VariantFile(path));
        }

        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| LibraryError::PathNotRegistered(path.clone()))?;
        let entry = self
            .path_entry(&dir)
            .ok_or_else(|| LibraryError::PathNotRegistered(dir.clone()))?;

        let video = parse_video(&entry, &path).map_err(|source| LibraryError::Parse {
            path: path.clone(),
            source,
        })?;

        self.commit(&dir, video)
    }

    /// Insert a parsed video unless its root or its file went away meanwhile.
    ///
    /// The existence check runs under the write lock so a `remove` that
    /// landed after parsing is never undone.
    fn commit(&self, dir: &Path, video: Video) -> Result<Video, LibraryError> {
        let mut state = self.write();
        if !state.paths.contains_key(dir) {
            return Err(LibraryError::PathNotRegistered(dir.to_path_buf()));
        }
        if !video.path.exists() {
            return Err(LibraryError::Vanished(video.path));
        }
        state.videos.insert(video.id.clone(), video.clone());
        info!(id = %video.id, path = %video.path.display(), "Added");
        Ok(video)
    }

    /// Drop the video stored at `path`, if it is indexed.
    ///
    /// No-op when the directory is not registered, the id is absent, or the
    /// indexed video lives at a different path (e.g. `path` is its thumbnail).
    pub fn remove(&self, path: &Path) -> Option<Video> {
        let path = normalize_path(path).ok()?;
        let dir = path.parent()?;
        let file_name = path.file_name()?.to_string_lossy().into_owned();

        let mut state = self.write();
        let entry = state.paths.get(dir)?;
        let id = entry.video_id(&file_name);

        if state.videos.get(&id).map(|v| v.path != path).unwrap_or(true) {
            return None;
        }
        let video = state.videos.remove(&id)?;
        info!(id = %video.id, path = %video.path.display(), "Removed");
        Some(video)
    }

    /// Look up a video by id.
    pub fn get(&self, id: &str) -> Option<Video> {
        self.read().videos.get(id).cloned()
    }

    /// Look up a registered root.
    pub fn path_entry(&self, root: &Path) -> Option<PathEntry> {
        self.read().paths.get(root).cloned()
    }

    /// All registered roots, sorted by root path.
    pub fn paths(&self) -> Vec<PathEntry> {
        let mut paths: Vec<_> = self.read().paths.values().cloned().collect();
        paths.sort_by(|a, b| a.root.cmp(&b.root));
        paths
    }

    /// Number of indexed videos.
    pub fn len(&self) -> usize {
        self.read().videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All videos in the requested order.
    pub fn playlist(&self, order: SortOrder) -> Vec<Video> {
        self.playlist_with(order, |_| 0)
    }

    /// All videos in the requested order, with view counts filled in by `views`.
    pub fn playlist_with<F>(&self, order: SortOrder, views: F) -> Vec<Video>
    where
        F: Fn(&str) -> u64,
    {
        let mut playlist: Vec<Video> = self.read().videos.values().cloned().collect();
        for video in &mut playlist {
            video.views = views(&video.id);
        }
        sort_videos(&mut playlist, order);
        playlist
    }
}
