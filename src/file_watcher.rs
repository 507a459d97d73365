//! Directory change notifications.
//!
//! [`DirWatcher`] wraps the `notify` crate's OS-native backend (inotify on
//! Linux, FSEvents/kqueue on macOS) for one non-recursive directory and
//! classifies raw events into [`DirEventKind`]. Creation, deletion and
//! rename all count as *rename-class* changes: they are what signals a
//! file appearing in or disappearing from the directory.
//!
//! Events are consumed event-driven: [`DirWatcher::spawn_forwarder`] moves
//! the receiving end onto a blocking task that hands each batch to a
//! callback, typically a channel send into the emitter loop.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::task::JoinHandle;

/// Classification of a directory change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirEventKind {
    /// A file appeared.
    Create,
    /// A file was renamed or moved.
    Rename,
    /// A file was removed.
    Delete,
    /// Content or metadata changed.
    Modify,
    /// Access and watcher-internal events.
    Other,
}

impl DirEventKind {
    /// Returns `true` for changes that add or remove a directory entry.
    #[must_use]
    pub fn is_rename_class(self) -> bool {
        matches!(self, Self::Create | Self::Rename | Self::Delete)
    }
}

/// A single classified change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEvent {
    /// Path of the affected entry.
    pub path: PathBuf,
    /// What happened to it.
    pub kind: DirEventKind,
}

impl DirEvent {
    /// Build an event for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, kind: DirEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Final component of the path.
    #[must_use]
    pub fn file_name(&self) -> Option<&OsStr> {
        self.path.file_name()
    }
}

type RawReceiver = mpsc::Receiver<notify::Result<Event>>;

/// Watches one directory for entry changes.
pub struct DirWatcher {
    watcher: RecommendedWatcher,
    rx: Option<RawReceiver>,
    dir: PathBuf,
}

impl std::fmt::Debug for DirWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirWatcher")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl DirWatcher {
    /// Start watching `dir` (non-recursively).
    ///
    /// # Errors
    ///
    /// Returns an error if the OS watcher cannot be initialized or `dir`
    /// does not exist.
    pub fn new(dir: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .context("Failed to create directory watcher")?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch: {}", dir.display()))?;

        log::info!("Watching for daemon socket changes: {}", dir.display());
        Ok(Self {
            watcher,
            rx: Some(rx),
            dir: dir.to_path_buf(),
        })
    }

    /// Directory being watched.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drain buffered events without blocking.
    ///
    /// Returns nothing once the receiver has moved to a forwarder.
    #[must_use]
    pub fn poll(&self) -> Vec<DirEvent> {
        let Some(ref rx) = self.rx else {
            return Vec::new();
        };

        let mut events = Vec::new();
        while let Ok(result) = rx.try_recv() {
            match result {
                Ok(event) => events.extend(Self::classify_event(&event)),
                Err(e) => log::warn!("Directory watcher error: {e}"),
            }
        }
        events
    }

    /// Move event delivery onto a blocking task.
    ///
    /// `deliver` receives each non-empty batch and returns `false` to stop
    /// forwarding. The task also ends when this watcher is dropped, since
    /// that closes the sending side. Returns `None` if a forwarder is
    /// already running.
    pub fn spawn_forwarder<F>(
        &mut self,
        handle: &tokio::runtime::Handle,
        mut deliver: F,
    ) -> Option<JoinHandle<()>>
    where
        F: FnMut(Vec<DirEvent>) -> bool + Send + 'static,
    {
        let rx = self.rx.take()?;
        Some(handle.spawn_blocking(move || {
            // Blocking recv: wakes only when the OS delivers an event.
            while let Ok(result) = rx.recv() {
                let events = match result {
                    Ok(event) => Self::classify_event(&event),
                    Err(e) => {
                        log::warn!("Directory watcher error: {e}");
                        continue;
                    }
                };
                if events.is_empty() {
                    continue;
                }
                if !deliver(events) {
                    break;
                }
            }
            log::debug!("Directory watch forwarder exiting");
        }))
    }

    /// Classify a raw `notify::Event` into one [`DirEvent`] per path.
    #[must_use]
    pub fn classify_event(event: &Event) -> Vec<DirEvent> {
        let kind = Self::classify(&event.kind);
        event
            .paths
            .iter()
            .map(|p| DirEvent::new(p.clone(), kind))
            .collect()
    }

    fn classify(kind: &notify::EventKind) -> DirEventKind {
        use notify::event::ModifyKind;
        match kind {
            notify::EventKind::Create(_) => DirEventKind::Create,
            notify::EventKind::Modify(ModifyKind::Name(_)) => DirEventKind::Rename,
            notify::EventKind::Modify(_) => DirEventKind::Modify,
            notify::EventKind::Remove(_) => DirEventKind::Delete,
            _ => DirEventKind::Other,
        }
    }
}

impl Drop for DirWatcher {
    fn drop(&mut self) {
        let _ = self.watcher.unwatch(&self.dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RemoveKind, RenameMode};
    use notify::EventKind;
    use std::time::{Duration, Instant};

    #[test]
    fn test_watch_nonexistent_dir_fails() {
        let result = DirWatcher::new(Path::new("/nonexistent/path/abc123"));
        assert!(result.is_err());
    }

    #[test]
    fn test_classify_kinds() {
        assert_eq!(
            DirWatcher::classify(&EventKind::Create(CreateKind::File)),
            DirEventKind::Create
        );
        assert_eq!(
            DirWatcher::classify(&EventKind::Modify(ModifyKind::Name(RenameMode::Both))),
            DirEventKind::Rename
        );
        assert_eq!(
            DirWatcher::classify(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            DirEventKind::Modify
        );
        assert_eq!(
            DirWatcher::classify(&EventKind::Remove(RemoveKind::File)),
            DirEventKind::Delete
        );
        assert_eq!(
            DirWatcher::classify(&EventKind::Access(AccessKind::Read)),
            DirEventKind::Other
        );
    }

    #[test]
    fn test_rename_class() {
        assert!(DirEventKind::Create.is_rename_class());
        assert!(DirEventKind::Rename.is_rename_class());
        assert!(DirEventKind::Delete.is_rename_class());
        assert!(!DirEventKind::Modify.is_rename_class());
        assert!(!DirEventKind::Other.is_rename_class());
    }

    #[test]
    fn test_classify_event_one_per_path() {
        let event = Event::new(EventKind::Remove(RemoveKind::File))
            .add_path(PathBuf::from("/run/docker.sock"))
            .add_path(PathBuf::from("/run/docker.pid"));
        let events = DirWatcher::classify_event(&event);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].file_name(), Some(OsStr::new("docker.sock")));
        assert_eq!(events[1].kind, DirEventKind::Delete);
    }

    #[test]
    fn test_poll_sees_created_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let watcher = DirWatcher::new(dir.path()).expect("watcher");
        std::fs::write(dir.path().join("docker.pid"), "1").expect("write");

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while Instant::now() < deadline && seen.is_empty() {
            seen = watcher
                .poll()
                .into_iter()
                .filter(|e| e.kind.is_rename_class())
                .collect();
            std::thread::sleep(Duration::from_millis(20));
        }

        assert!(seen.iter().any(|e| e.file_name() == Some(OsStr::new("docker.pid"))));
    }

    #[test]
    fn test_debug_names_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let watcher = DirWatcher::new(dir.path()).expect("watcher");
        assert!(format!("{watcher:?}").contains("DirWatcher"));
        assert_eq!(watcher.dir(), dir.path());
    }
}
