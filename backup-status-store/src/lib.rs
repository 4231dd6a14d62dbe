//! # backup-status-store
//!
//! Cross-process shared namespace and the stores built on it.
//!
//! [`PreferencesStore`] publishes the latest parsed snapshot for display
//! consumers and posts a [`RefreshSignal`] after every change.
//! [`TokenStore`] keeps the access token across restarts.

pub mod defaults;
pub mod error;
pub mod preferences;
pub mod signal;
pub mod token_store;

pub use defaults::{shared_dir_at, SharedDefaults};
pub use error::StoreError;
pub use preferences::{PreferencesStore, SaveOutcome, StoredPreferences, PREFERENCES_KEY};
pub use signal::{FileRefreshSignal, RecordingSignal, RefreshSignal, SignalRecord};
pub use token_store::{TokenStore, TOKEN_KEY};
