//! Orchestrator: the access / watch / parse / publish state machine.
//!
//! ```text
//!            init / update_access
//!   NoAccess ───────granted──────▶ Watching ──┐ debounced change:
//!      ▲                              │  ◀────┘ reparse, save or clear
//!      └─────────denied───────────────┘
//!   any ──shutdown──▶ Stopped
//! ```
//!
//! Each transition performs its side effects synchronously and returns the
//! new state. One orchestrator is owned by one task, so parse + save never
//! run concurrently.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use backup_status_core::parser;
use backup_status_store::{PreferencesStore, SaveOutcome};

use crate::debounce::Debouncer;
use crate::gate::{AccessGate, AccessStatus};
use crate::watcher::{ChangeCallback, Watcher};

/// One raw notification forwarded from the watcher's background context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawChange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    NoAccess,
    Watching,
    Stopped,
}

/// Result of one parse-and-publish run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published(SaveOutcome),
    /// The parse succeeded but saving failed; the store was cleared.
    SaveFailed(String),
    /// The parse failed; the store was cleared.
    ParseFailed(String),
}

/// Runtime status for `daemon status`.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub state: MonitorState,
    pub has_access: bool,
    pub watched_path: Option<PathBuf>,
    pub watcher_running: bool,
    pub destinations: usize,
    pub publishes: u64,
    pub last_published_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub struct Orchestrator<W: Watcher> {
    gate: AccessGate,
    store: PreferencesStore,
    watcher: W,
    debouncer: Debouncer,
    changes: Option<mpsc::UnboundedSender<RawChange>>,
    state: MonitorState,
    watched: Option<PathBuf>,
    destinations: usize,
    publishes: u64,
    last_published_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl<W: Watcher> Orchestrator<W> {
    /// Raw changes from `watcher` are forwarded to `changes`; the owner feeds
    /// them back through [`Orchestrator::on_raw_change`] in arrival order.
    pub fn new(
        gate: AccessGate,
        store: PreferencesStore,
        watcher: W,
        debouncer: Debouncer,
        changes: mpsc::UnboundedSender<RawChange>,
    ) -> Self {
        Self {
            gate,
            store,
            watcher,
            debouncer,
            changes: Some(changes),
            state: MonitorState::NoAccess,
            watched: None,
            destinations: 0,
            publishes: 0,
            last_published_at: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn watched_path(&self) -> Option<&Path> {
        self.watched.as_deref()
    }

    pub fn store(&self) -> &PreferencesStore {
        &self.store
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    /// Initial access query.
    pub fn init(&mut self) -> MonitorState {
        self.update_access()
    }

    /// Re-query access and transition accordingly.
    pub fn update_access(&mut self) -> MonitorState {
        if self.state == MonitorState::Stopped {
            return self.state;
        }
        self.state = match self.gate.check() {
            AccessStatus::Granted { path } => self.on_granted(path),
            AccessStatus::Denied { reason } => {
                tracing::info!(reason = %reason, "no access to preferences file");
                self.on_denied()
            }
        };
        self.state
    }

    fn on_granted(&mut self, path: PathBuf) -> MonitorState {
        if self.state == MonitorState::Watching && self.watched.as_deref() == Some(path.as_path()) {
            return MonitorState::Watching;
        }

        tracing::info!(path = %path.display(), "access granted, starting monitor");
        self.watched = Some(path.clone());
        self.publish();

        self.debouncer.reset();
        let Some(callback) = self.change_callback() else {
            return self.on_denied();
        };
        match self.watcher.start(&path, callback) {
            Ok(()) => MonitorState::Watching,
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "failed to start watcher");
                self.last_error = Some(format!("watcher: {err}"));
                self.on_denied()
            }
        }
    }

    fn on_denied(&mut self) -> MonitorState {
        self.watcher.stop();
        self.watched = None;
        self.destinations = 0;
        if let Err(err) = self.store.clear() {
            tracing::error!(error = %err, "failed to clear published preferences");
        }
        MonitorState::NoAccess
    }

    fn change_callback(&self) -> Option<ChangeCallback> {
        let tx = self.changes.clone()?;
        Some(Arc::new(move || {
            let _ = tx.send(RawChange);
        }))
    }

    /// Feed one raw change observed at `now`. Returns the publish outcome
    /// when the debouncer accepted it.
    pub fn on_raw_change(&mut self, now: Instant) -> Option<PublishOutcome> {
        if self.state != MonitorState::Watching {
            return None;
        }
        if !self.debouncer.observe(now) {
            tracing::trace!("raw change debounced");
            return None;
        }
        tracing::debug!("preferences file changed");
        Some(self.publish())
    }

    /// Parse the watched file and save the result, or clear on any failure.
    /// The watcher stays active either way.
    pub fn publish(&mut self) -> PublishOutcome {
        let Some(path) = self.watched.clone() else {
            return PublishOutcome::ParseFailed("no watched path".to_string());
        };

        let snapshot = match parser::parse(&path, self.gate.provider()) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    kind = err.kind(),
                    error = %err,
                    "parse failed, clearing published preferences",
                );
                self.fail(err.to_string());
                return PublishOutcome::ParseFailed(err.to_string());
            }
        };

        match self.store.save(&snapshot) {
            Ok(outcome) => {
                self.destinations = snapshot.destinations.len();
                self.publishes += 1;
                self.last_published_at = Some(Utc::now());
                self.last_error = None;
                PublishOutcome::Published(outcome)
            }
            Err(err) => {
                // save() already cleared the store.
                tracing::error!(error = %err, "failed to publish preferences");
                self.destinations = 0;
                self.last_error = Some(err.to_string());
                PublishOutcome::SaveFailed(err.to_string())
            }
        }
    }

    fn fail(&mut self, message: String) {
        self.destinations = 0;
        self.last_error = Some(message);
        if let Err(err) = self.store.clear() {
            tracing::error!(error = %err, "failed to clear published preferences");
        }
    }

    /// Stop watching and detach every observer. Terminal.
    pub fn shutdown(&mut self) -> MonitorState {
        self.watcher.stop();
        self.changes = None;
        self.state = MonitorState::Stopped;
        tracing::info!("monitor stopped");
        self.state
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            state: self.state,
            has_access: self.state == MonitorState::Watching,
            watched_path: self.watched.clone(),
            watcher_running: self.watcher.is_running(),
            destinations: self.destinations,
            publishes: self.publishes,
            last_published_at: self.last_published_at,
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    use backup_status_core::{DestinationId, FileAccessProvider};
    use backup_status_store::{RecordingSignal, SharedDefaults, TokenStore};
    use plist::{Dictionary, Value};
    use tempfile::TempDir;

    use crate::watcher::ManualWatcher;

    const COOLDOWN: Duration = Duration::from_secs(1);

    struct Harness {
        home: TempDir,
        prefs: PathBuf,
        watcher: ManualWatcher,
        signal: RecordingSignal,
        rx: mpsc::UnboundedReceiver<RawChange>,
        orchestrator: Orchestrator<ManualWatcher>,
    }

    impl Harness {
        fn new() -> Self {
            let home = TempDir::new().unwrap();
            let prefs = home.path().join("com.apple.TimeMachine.plist");
            let watcher = ManualWatcher::new();
            let signal = RecordingSignal::new();
            let (tx, rx) = mpsc::unbounded_channel();

            let gate = AccessGate::new(
                Arc::new(FileAccessProvider::new()),
                TokenStore::new(SharedDefaults::open_at(home.path())),
            );
            let store = PreferencesStore::new(
                SharedDefaults::open_at(home.path()),
                Box::new(signal.clone()),
            );
            let orchestrator =
                Orchestrator::new(gate, store, watcher.clone(), Debouncer::new(COOLDOWN), tx);

            Self {
                home,
                prefs,
                watcher,
                signal,
                rx,
                orchestrator,
            }
        }

        fn grant(&self) {
            self.orchestrator.gate().grant(&self.prefs).unwrap();
        }

        /// Fire the watcher and feed every forwarded change back in.
        fn change_at(&mut self, now: Instant) -> Option<PublishOutcome> {
            assert!(self.watcher.fire(), "watcher should be running");
            let mut outcome = None;
            while self.rx.try_recv().is_ok() {
                outcome = self.orchestrator.on_raw_change(now);
            }
            outcome
        }

        fn published(&self) -> Option<backup_status_core::Snapshot> {
            self.orchestrator.store().load()
        }
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    fn write_prefs(path: &Path, snapshots: &[SystemTime]) {
        let mut dest = Dictionary::new();
        dest.insert("DestinationID".to_string(), Value::from("D1"));
        dest.insert("LastKnownVolumeName".to_string(), Value::from("Backups"));
        dest.insert(
            "SnapshotDates".to_string(),
            Value::Array(snapshots.iter().map(|t| Value::Date((*t).into())).collect()),
        );
        let mut root = Dictionary::new();
        root.insert("Destinations".to_string(), Value::Array(vec![Value::Dictionary(dest)]));
        root.insert("LastDestinationID".to_string(), Value::from("D1"));
        Value::Dictionary(root).to_file_xml(path).unwrap();
    }

    fn last_snapshot(snapshot: &backup_status_core::Snapshot) -> Option<DateTime<Utc>> {
        snapshot
            .destination(&DestinationId::from("D1"))
            .and_then(|d| d.last_snapshot())
    }

    #[test]
    fn init_without_token_clears_and_does_not_watch() {
        let mut h = Harness::new();
        assert_eq!(h.orchestrator.init(), MonitorState::NoAccess);
        assert!(!h.watcher.is_running());
        assert!(h.published().is_none());
        assert_eq!(h.signal.posts(), 1, "clearing always signals");
    }

    #[test]
    fn grant_then_update_access_publishes_and_watches() {
        let mut h = Harness::new();
        write_prefs(&h.prefs, &[at(2), at(1)]);
        assert_eq!(h.orchestrator.init(), MonitorState::NoAccess);
        h.grant();

        assert_eq!(h.orchestrator.update_access(), MonitorState::Watching);
        let published = h.published().expect("snapshot published");
        assert_eq!(last_snapshot(&published), Some(at(2).into()));
        assert_eq!(
            h.watcher.watched_path(),
            Some(std::fs::canonicalize(&h.prefs).unwrap())
        );
        assert!(h.orchestrator.status().has_access);
    }

    #[test]
    fn debounced_change_republishes_latest_snapshot() {
        let mut h = Harness::new();
        write_prefs(&h.prefs, &[at(1)]);
        h.grant();
        h.orchestrator.init();

        write_prefs(&h.prefs, &[at(1), at(2)]);
        let t0 = Instant::now();
        assert_eq!(h.change_at(t0), None, "first raw event after start is noise");
        assert_eq!(h.change_at(t0 + Duration::from_millis(200)), None);

        let outcome = h.change_at(t0 + Duration::from_secs(2));
        assert_eq!(outcome, Some(PublishOutcome::Published(SaveOutcome::Written)));
        assert_eq!(last_snapshot(&h.published().unwrap()), Some(at(2).into()));
    }

    #[test]
    fn identical_content_is_not_rewritten() {
        let mut h = Harness::new();
        write_prefs(&h.prefs, &[at(1)]);
        h.grant();
        h.orchestrator.init();
        let posts = h.signal.posts();

        let t0 = Instant::now();
        h.change_at(t0);
        let outcome = h.change_at(t0 + Duration::from_secs(2));
        assert_eq!(outcome, Some(PublishOutcome::Published(SaveOutcome::Unchanged)));
        assert_eq!(h.signal.posts(), posts);
    }

    #[test]
    fn revoke_after_success_clears_store() {
        let mut h = Harness::new();
        write_prefs(&h.prefs, &[at(1)]);
        h.grant();
        h.orchestrator.init();
        assert!(h.published().is_some());

        h.orchestrator.gate().revoke().unwrap();
        assert_eq!(h.orchestrator.update_access(), MonitorState::NoAccess);
        assert!(h.published().is_none());
        assert!(!h.watcher.is_running());
        assert_eq!(h.watcher.stops(), 1);
    }

    #[test]
    fn format_error_clears_prior_content_and_keeps_watching() {
        let mut h = Harness::new();
        write_prefs(&h.prefs, &[at(1)]);
        h.grant();
        h.orchestrator.init();

        std::fs::write(&h.prefs, b"not a property list").unwrap();
        let t0 = Instant::now();
        h.change_at(t0);
        let outcome = h.change_at(t0 + Duration::from_secs(2));
        assert!(matches!(outcome, Some(PublishOutcome::ParseFailed(_))), "got {outcome:?}");
        assert!(h.published().is_none());
        assert_eq!(h.orchestrator.state(), MonitorState::Watching);
        assert!(h.watcher.is_running());
        assert!(h.orchestrator.status().last_error.is_some());

        write_prefs(&h.prefs, &[at(3)]);
        h.change_at(t0 + Duration::from_secs(4));
        assert_eq!(last_snapshot(&h.published().unwrap()), Some(at(3).into()));
        assert!(h.orchestrator.status().last_error.is_none());
    }

    #[test]
    fn plist_without_destinations_clears_prior_content() {
        let mut h = Harness::new();
        write_prefs(&h.prefs, &[at(1)]);
        h.grant();
        h.orchestrator.init();
        assert!(h.published().is_some());

        let mut root = Dictionary::new();
        root.insert("AutoBackup".to_string(), Value::Boolean(true));
        Value::Dictionary(root).to_file_xml(&h.prefs).unwrap();

        let t0 = Instant::now();
        h.change_at(t0);
        let outcome = h.change_at(t0 + Duration::from_secs(2));
        match outcome {
            Some(PublishOutcome::ParseFailed(message)) => {
                assert!(message.contains("Destinations"), "got {message}");
            }
            other => panic!("expected parse failure, got {other:?}"),
        }
        assert!(h.published().is_none());
        assert_eq!(h.orchestrator.state(), MonitorState::Watching);
        assert!(h.watcher.is_running());
    }

    #[test]
    fn deleted_file_clears_store_on_next_change() {
        let mut h = Harness::new();
        write_prefs(&h.prefs, &[at(1)]);
        h.grant();
        h.orchestrator.init();

        std::fs::remove_file(&h.prefs).unwrap();
        let t0 = Instant::now();
        h.change_at(t0);
        h.change_at(t0 + Duration::from_secs(2));
        assert!(h.published().is_none());
        assert_eq!(h.orchestrator.state(), MonitorState::Watching);
    }

    #[test]
    fn update_access_with_same_path_does_not_restart() {
        let mut h = Harness::new();
        write_prefs(&h.prefs, &[at(1)]);
        h.grant();
        h.orchestrator.init();
        h.orchestrator.update_access();
        h.orchestrator.update_access();
        assert_eq!(h.watcher.starts(), 1);
        assert_eq!(h.orchestrator.status().publishes, 1);
    }

    #[test]
    fn granting_a_different_file_restarts_watcher() {
        let mut h = Harness::new();
        write_prefs(&h.prefs, &[at(1)]);
        h.grant();
        h.orchestrator.init();

        let other = h.home.path().join("other.plist");
        write_prefs(&other, &[at(5)]);
        h.orchestrator.gate().grant(&other).unwrap();
        assert_eq!(h.orchestrator.update_access(), MonitorState::Watching);

        assert_eq!(h.watcher.starts(), 2);
        assert_eq!(
            h.watcher.watched_path(),
            Some(std::fs::canonicalize(&other).unwrap())
        );
        assert_eq!(last_snapshot(&h.published().unwrap()), Some(at(5).into()));
    }

    #[test]
    fn changes_without_access_are_ignored() {
        let mut h = Harness::new();
        h.orchestrator.init();
        assert_eq!(h.orchestrator.on_raw_change(Instant::now()), None);
    }

    #[test]
    fn shutdown_stops_watcher_but_keeps_published_state() {
        let mut h = Harness::new();
        write_prefs(&h.prefs, &[at(1)]);
        h.grant();
        h.orchestrator.init();

        assert_eq!(h.orchestrator.shutdown(), MonitorState::Stopped);
        assert!(!h.watcher.is_running());
        assert!(h.published().is_some());
        assert_eq!(h.orchestrator.update_access(), MonitorState::Stopped);
        assert_eq!(h.orchestrator.on_raw_change(Instant::now()), None);
    }
}
