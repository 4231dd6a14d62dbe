//! Backup status daemon: access gate, file watcher, debouncer and the
//! orchestrator that keeps the shared store in step with the preferences file.

pub mod config;
pub mod debounce;
mod error;
pub mod gate;
pub mod orchestrator;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod watcher;

pub use config::DaemonConfig;
pub use debounce::Debouncer;
pub use error::DaemonError;
pub use gate::{AccessGate, AccessStatus};
pub use orchestrator::{MonitorState, MonitorStatus, Orchestrator, PublishOutcome, RawChange};
pub use protocol::{
    request_status, request_stop, request_update_access, send_request, DaemonRequest,
    DaemonResponse,
};
pub use runtime::{open_gate, open_store, run, start_blocking};
pub use watcher::{ChangeCallback, ManualWatcher, NotifyWatcher, Watcher};
