//! Persisted access token, kept in the shared namespace so it survives
//! process restarts.

use backup_status_core::Token;

use crate::defaults::SharedDefaults;
use crate::error::StoreError;

pub const TOKEN_KEY: &str = "access_token";

#[derive(Debug, Clone)]
pub struct TokenStore {
    defaults: SharedDefaults,
}

impl TokenStore {
    pub fn new(defaults: SharedDefaults) -> Self {
        Self { defaults }
    }

    /// The stored token, `Ok(None)` if none was granted.
    pub fn load(&self) -> Result<Option<Token>, StoreError> {
        self.defaults.get(TOKEN_KEY)
    }

    pub fn save(&self, token: &Token) -> Result<(), StoreError> {
        self.defaults.set(TOKEN_KEY, token)?;
        tracing::info!("stored access token for {}", token.path().display());
        Ok(())
    }

    /// Forget the stored token. Returns whether one was present.
    pub fn remove(&self) -> Result<bool, StoreError> {
        self.defaults.remove(TOKEN_KEY)
    }
}
