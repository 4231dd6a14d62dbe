//! File watchers: raw change notifications for exactly one path.
//!
//! [`NotifyWatcher`] subscribes through `notify` to the file's parent
//! directory (the watched file is usually replaced by rename, which would
//! orphan a watch on the file itself) and filters out events for siblings.
//! [`ManualWatcher`] is the in-memory counterpart driven by hand.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode};

use crate::error::DaemonError;

/// Invoked for every raw change; may be called from a background thread.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// Subscription to change notifications for one file.
pub trait Watcher: Send {
    /// Start watching `path`. A running subscription is stopped first.
    fn start(&mut self, path: &Path, on_change: ChangeCallback) -> Result<(), DaemonError>;

    /// Stop watching. Safe to call when not running.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// OS-backed watcher (FSEvents on macOS, inotify on Linux).
#[derive(Default)]
pub struct NotifyWatcher {
    inner: Option<RecommendedWatcher>,
}

impl NotifyWatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Watcher for NotifyWatcher {
    fn start(&mut self, path: &Path, on_change: ChangeCallback) -> Result<(), DaemonError> {
        self.stop();

        let target = watch_target(path);
        let Some(dir) = target.parent().map(Path::to_path_buf) else {
            return Err(DaemonError::Watch {
                path: path.to_path_buf(),
                reason: "no parent directory".to_string(),
            });
        };

        let filter_target = target.clone();
        let mut watcher = recommended_watcher(move |event: notify::Result<Event>| match event {
            Ok(event) => {
                if is_relevant_event_kind(&event.kind)
                    && event.paths.iter().any(|p| p == &filter_target)
                {
                    on_change();
                }
            }
            Err(err) => tracing::warn!(error = %err, "watcher event error"),
        })?;
        notify::Watcher::watch(&mut watcher, &dir, RecursiveMode::NonRecursive)?;

        tracing::debug!(path = %target.display(), "watching preferences file");
        self.inner = Some(watcher);
        Ok(())
    }

    fn stop(&mut self) {
        if self.inner.take().is_some() {
            tracing::debug!("stopped preferences file watcher");
        }
    }

    fn is_running(&self) -> bool {
        self.inner.is_some()
    }
}

/// Canonicalize the parent so event paths (which arrive as real paths, e.g.
/// `/private/var/...` on macOS) compare equal to the target.
fn watch_target(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => std::fs::canonicalize(parent)
            .unwrap_or_else(|_| parent.to_path_buf())
            .join(name),
        _ => path.to_path_buf(),
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

#[derive(Default)]
struct ManualState {
    callback: Option<ChangeCallback>,
    path: Option<PathBuf>,
    starts: usize,
    stops: usize,
}

/// Watcher driven by [`ManualWatcher::fire`]. Clones share state, so a test
/// can keep a handle after moving the watcher into an orchestrator.
#[derive(Clone, Default)]
pub struct ManualWatcher {
    state: Arc<Mutex<ManualState>>,
}

impl ManualWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver one raw change. Returns `false` when not running.
    pub fn fire(&self) -> bool {
        let callback = self.lock().callback.clone();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    pub fn watched_path(&self) -> Option<PathBuf> {
        self.lock().path.clone()
    }

    pub fn starts(&self) -> usize {
        self.lock().starts
    }

    pub fn stops(&self) -> usize {
        self.lock().stops
    }
}

impl Watcher for ManualWatcher {
    fn start(&mut self, path: &Path, on_change: ChangeCallback) -> Result<(), DaemonError> {
        self.stop();
        let mut state = self.lock();
        state.callback = Some(on_change);
        state.path = Some(path.to_path_buf());
        state.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.lock();
        if state.callback.take().is_some() {
            state.path = None;
            state.stops += 1;
        }
    }

    fn is_running(&self) -> bool {
        self.lock().callback.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn counter() -> (Arc<AtomicUsize>, ChangeCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = count.clone();
        let callback: ChangeCallback = Arc::new(move || {
            handle.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    #[test]
    fn manual_restart_stops_previous_subscription() {
        let mut watcher = ManualWatcher::new();
        let (first, first_cb) = counter();
        let (second, second_cb) = counter();

        watcher.start(Path::new("/a.plist"), first_cb).unwrap();
        watcher.start(Path::new("/b.plist"), second_cb).unwrap();
        assert!(watcher.fire());

        assert_eq!(first.load(Ordering::SeqCst), 0, "old callback must be detached");
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(watcher.starts(), 2);
        assert_eq!(watcher.stops(), 1);
        assert_eq!(watcher.watched_path(), Some(PathBuf::from("/b.plist")));
    }

    #[test]
    fn manual_stop_is_idempotent() {
        let mut watcher = ManualWatcher::new();
        watcher.stop();
        let (_, cb) = counter();
        watcher.start(Path::new("/a.plist"), cb).unwrap();
        watcher.stop();
        watcher.stop();
        assert_eq!(watcher.stops(), 1);
        assert!(!watcher.is_running());
        assert!(!watcher.fire());
    }

    #[test]
    fn path_without_parent_is_a_watch_error() {
        let (_, cb) = counter();
        let mut watcher = NotifyWatcher::new();
        let err = watcher.start(Path::new("/"), cb).unwrap_err();
        assert!(matches!(err, DaemonError::Watch { .. }), "got: {err}");
        assert!(err.to_string().starts_with("cannot watch /"));
        assert!(!watcher.is_running());
    }

    #[test]
    fn relevant_event_kinds() {
        use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};
        assert!(is_relevant_event_kind(&EventKind::Create(CreateKind::File)));
        assert!(is_relevant_event_kind(&EventKind::Modify(ModifyKind::Any)));
        assert!(is_relevant_event_kind(&EventKind::Remove(RemoveKind::File)));
        assert!(!is_relevant_event_kind(&EventKind::Access(AccessKind::Any)));
    }

    #[test]
    fn notify_watcher_reports_target_and_ignores_siblings() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("com.apple.TimeMachine.plist");
        let sibling = dir.path().join("com.apple.other.plist");
        std::fs::write(&target, b"v1").unwrap();

        let (count, cb) = counter();
        let mut watcher = NotifyWatcher::new();
        watcher.start(&target, cb).unwrap();
        assert!(watcher.is_running());

        std::fs::write(&sibling, b"noise").unwrap();
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(count.load(Ordering::SeqCst), 0, "sibling writes are filtered");

        std::fs::write(&target, b"v2").unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(25));
        }
        assert!(count.load(Ordering::SeqCst) >= 1, "target write must be reported");

        watcher.stop();
        watcher.stop();
        assert!(!watcher.is_running());
    }
}
