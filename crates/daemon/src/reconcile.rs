//! Filesystem reconciler.
//!
//! Keeps the library index in step with files that appear, change or vanish
//! in registered roots outside the ingestion pipeline. OS notifications are
//! reduced to [`ReconcileEvent`]s and queued; one task drains the queue and
//! applies each event on the blocking pool.

use crate::library::Library;
use crate::scan::{is_variant_path, is_video_file};
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Errors raised while setting up watches
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The OS watcher could not be created
    #[error("Failed to create filesystem watcher: {0}")]
    Init(#[source] notify::Error),

    /// A directory could not be watched
    #[error("Failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// A change the index has to follow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    /// File created or written; (re)index it
    Upsert(PathBuf),
    /// File removed or renamed away; drop it
    Remove(PathBuf),
}

impl ReconcileEvent {
    pub fn path(&self) -> &Path {
        match self {
            ReconcileEvent::Upsert(path) | ReconcileEvent::Remove(path) => path,
        }
    }
}

/// Whether a path can hold an indexable video.
///
/// Hidden files (including in-flight temporaries) and variant files never
/// are.
fn is_tracked(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(true);
    !hidden && !is_variant_path(path) && is_video_file(path)
}

/// Reduce a raw notification to index events.
///
/// A rename with both endpoints yields `Remove(from)` then `Upsert(to)`.
pub fn translate(event: &Event) -> Vec<ReconcileEvent> {
    let events = match &event.kind {
        EventKind::Create(_)
        | EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Any)
        | EventKind::Modify(ModifyKind::Other)
        | EventKind::Access(AccessKind::Close(AccessMode::Write))
        | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .iter()
            .cloned()
            .map(ReconcileEvent::Upsert)
            .collect(),
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .iter()
            .cloned()
            .map(ReconcileEvent::Remove)
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => vec![
                ReconcileEvent::Remove(from.clone()),
                ReconcileEvent::Upsert(to.clone()),
            ],
            _ => Vec::new(),
        },
        // Backends that cannot tell which side of a rename a path is on
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|path| {
                if path.exists() {
                    ReconcileEvent::Upsert(path.clone())
                } else {
                    ReconcileEvent::Remove(path.clone())
                }
            })
            .collect(),
        _ => Vec::new(),
    };

    events
        .into_iter()
        .filter(|e| is_tracked(e.path()))
        .collect()
}

/// Apply one event to the index.
///
/// Upserts of files that fail to parse are dropped; if the file is already
/// gone the stale entry is removed instead.
pub fn apply(library: &Library, event: &ReconcileEvent) {
    match event {
        ReconcileEvent::Upsert(path) => {
            if let Err(e) = library.add(path) {
                if !path.exists() {
                    library.remove(path);
                } else {
                    debug!(path = %path.display(), error = %e, "Ignoring unparseable file");
                }
            }
        }
        ReconcileEvent::Remove(path) => {
            library.remove(path);
        }
    }
}

/// Drain `events` into the index until every sender is gone.
pub async fn run(library: Arc<Library>, mut events: mpsc::UnboundedReceiver<ReconcileEvent>) {
    while let Some(event) = events.recv().await {
        debug!(?event, "Reconciling");
        let library = library.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || apply(&library, &event)).await {
            error!(error = %e, "Reconcile task failed");
        }
    }
    debug!("Reconciler stopped");
}

/// Watches library roots and feeds the reconcile queue
pub struct Reconciler {
    watcher: Mutex<RecommendedWatcher>,
    events: mpsc::UnboundedSender<ReconcileEvent>,
}

impl Reconciler {
    /// Create the watcher and spawn the draining task.
    ///
    /// The task ends once the reconciler is dropped.
    pub fn start(library: Arc<Library>) -> Result<(Self, JoinHandle<()>), ReconcileError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let watcher_tx = tx.clone();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in translate(&event) {
                    if watcher_tx.send(change).is_err() {
                        return;
                    }
                }
            }
            Err(e) => warn!(error = %e, "Watch error"),
        })
        .map_err(ReconcileError::Init)?;

        let handle = tokio::spawn(run(library, rx));
        Ok((
            Self {
                watcher: Mutex::new(watcher),
                events: tx,
            },
            handle,
        ))
    }

    /// Start watching one root.
    pub fn watch(&self, root: &Path) -> Result<(), ReconcileError> {
        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        watcher
            .watch(root, RecursiveMode::NonRecursive)
            .map_err(|source| ReconcileError::Watch {
                path: root.to_path_buf(),
                source,
            })?;
        info!(path = %root.display(), "Watching");
        Ok(())
    }

    /// Watch every root, logging the ones that fail.
    ///
    /// # Returns
    /// Number of roots now watched
    pub fn watch_all<'a>(&self, roots: impl IntoIterator<Item = &'a Path>) -> usize {
        roots
            .into_iter()
            .filter(|root| match self.watch(root) {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Directory not watched");
                    false
                }
            })
            .count()
    }

    /// Stop watching a root.
    pub fn unwatch(&self, root: &Path) {
        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if watcher.unwatch(root).is_ok() {
            info!(path = %root.display(), "Stopped watching");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::PathEntry;
    use crate::testing::write_mp4;
    use notify::event::{CreateKind, RemoveKind};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn library_at(dir: &TempDir) -> (Arc<Library>, PathBuf) {
        let library = Arc::new(Library::new());
        let entry = library
            .add_path_entry(PathEntry::new(dir.path().join("lib"), ""))
            .unwrap();
        (library, entry.root)
    }

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    #[test]
    fn test_translate_create_and_remove() {
        assert_eq!(
            translate(&event(EventKind::Create(CreateKind::File), &["/lib/a.mp4"])),
            vec![ReconcileEvent::Upsert("/lib/a.mp4".into())]
        );
        assert_eq!(
            translate(&event(EventKind::Remove(RemoveKind::File), &["/lib/a.mp4"])),
            vec![ReconcileEvent::Remove("/lib/a.mp4".into())]
        );
    }

    #[test]
    fn test_translate_rename_both() {
        let kind = EventKind::Modify(ModifyKind::Name(RenameMode::Both));
        assert_eq!(
            translate(&event(kind, &["/lib/a.mp4", "/lib/b.mp4"])),
            vec![
                ReconcileEvent::Remove("/lib/a.mp4".into()),
                ReconcileEvent::Upsert("/lib/b.mp4".into()),
            ]
        );
    }

    #[test]
    fn test_translate_skips_untracked_names() {
        for path in ["/lib/.reel-x.mp4", "/lib/a#360p.mp4", "/lib/a.jpg", "/lib/notes.txt"] {
            let created = event(EventKind::Create(CreateKind::File), &[path]);
            assert!(translate(&created).is_empty(), "{path} should be skipped");
        }
        // a temporary renamed into place is tracked on its new name only
        let rename = EventKind::Modify(ModifyKind::Name(RenameMode::Both));
        assert_eq!(
            translate(&event(rename, &["/lib/.reel-x.mp4", "/lib/a.mp4"])),
            vec![ReconcileEvent::Upsert("/lib/a.mp4".into())]
        );
    }

    #[test]
    fn test_translate_ignores_reads() {
        let kind = EventKind::Access(AccessKind::Open(AccessMode::Read));
        assert!(translate(&event(kind, &["/lib/a.mp4"])).is_empty());
    }

    #[test]
    fn test_apply_is_idempotent_and_tolerates_reordering() {
        let dir = TempDir::new().unwrap();
        let (library, root) = library_at(&dir);
        let path = root.join("clip.mp4");
        write_mp4(&path, Some("Clip"));

        let upsert = ReconcileEvent::Upsert(path.clone());
        apply(&library, &upsert);
        apply(&library, &upsert);
        assert_eq!(library.len(), 1);

        // remove delivered twice, then a stale upsert for the deleted file
        fs::remove_file(&path).unwrap();
        apply(&library, &ReconcileEvent::Remove(path.clone()));
        apply(&library, &ReconcileEvent::Remove(path.clone()));
        apply(&library, &upsert);
        assert!(library.is_empty());
    }

    #[test]
    fn test_apply_ignores_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let (library, root) = library_at(&dir);
        let path = root.join("broken.mp4");
        fs::write(&path, b"not a video").unwrap();

        apply(&library, &ReconcileEvent::Upsert(path));
        assert!(library.is_empty());
    }

    #[test]
    fn test_apply_stale_upsert_drops_entry() {
        let dir = TempDir::new().unwrap();
        let (library, root) = library_at(&dir);
        let path = root.join("clip.mp4");
        write_mp4(&path, None);
        library.add(&path).unwrap();

        fs::remove_file(&path).unwrap();
        apply(&library, &ReconcileEvent::Upsert(path));
        assert!(library.get("clip").is_none());
    }

    #[tokio::test]
    async fn test_run_drains_queue_and_stops() {
        let dir = TempDir::new().unwrap();
        let (library, root) = library_at(&dir);
        let path = root.join("clip.mp4");
        write_mp4(&path, None);

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(library.clone(), rx));
        tx.send(ReconcileEvent::Upsert(path.clone())).unwrap();
        tx.send(ReconcileEvent::Upsert(path)).unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(library.len(), 1);
    }

    async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        check()
    }

    #[tokio::test]
    async fn test_watcher_follows_files() {
        let dir = TempDir::new().unwrap();
        let (library, root) = library_at(&dir);
        let (reconciler, _task) = Reconciler::start(library.clone()).unwrap();
        reconciler.watch(&root).unwrap();

        // written under a hidden name, then moved into place
        let staged = root.join(".incoming.mp4");
        write_mp4(&staged, Some("Watched"));
        fs::rename(&staged, root.join("watched.mp4")).unwrap();
        assert!(wait_for(|| library.get("watched").is_some()).await);

        fs::remove_file(root.join("watched.mp4")).unwrap();
        assert!(wait_for(|| library.get("watched").is_none()).await);
    }

    #[tokio::test]
    async fn test_watch_all_reports_failures_without_stopping() {
        let dir = TempDir::new().unwrap();
        let (library, root) = library_at(&dir);
        let (reconciler, _task) = Reconciler::start(library).unwrap();

        let missing = dir.path().join("missing");
        let watched = reconciler.watch_all([missing.as_path(), root.as_path()]);
        assert_eq!(watched, 1);
    }
}
