//! Access gate: decides whether watching and parsing may run at all.
//!
//! There are no push notifications for permission changes; callers ask via
//! [`AccessGate::check`] at lifecycle points (startup, `update-access`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use backup_status_core::{parser, AccessError, AccessProvider, Token};
use backup_status_store::TokenStore;

use crate::error::DaemonError;

/// Result of an access query.
#[derive(Debug)]
pub enum AccessStatus {
    /// The persisted token resolves to a readable file.
    Granted { path: PathBuf },
    /// No usable token.
    Denied { reason: AccessError },
}

impl AccessStatus {
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessStatus::Granted { .. })
    }
}

pub struct AccessGate {
    provider: Arc<dyn AccessProvider>,
    tokens: TokenStore,
}

impl AccessGate {
    pub fn new(provider: Arc<dyn AccessProvider>, tokens: TokenStore) -> Self {
        Self { provider, tokens }
    }

    pub fn provider(&self) -> &dyn AccessProvider {
        self.provider.as_ref()
    }

    /// Query the persisted token and the provider.
    pub fn check(&self) -> AccessStatus {
        let token = match self.tokens.load() {
            Ok(Some(token)) => token,
            Ok(None) => {
                return AccessStatus::Denied {
                    reason: AccessError::NoToken,
                }
            }
            Err(err) => {
                return AccessStatus::Denied {
                    reason: AccessError::BrokenToken {
                        reason: err.to_string(),
                    },
                }
            }
        };
        match self.provider.resolve(&token) {
            Ok(path) => AccessStatus::Granted { path },
            Err(reason) => AccessStatus::Denied { reason },
        }
    }

    pub fn has_access(&self) -> bool {
        self.check().is_granted()
    }

    /// Grant access to `path` after checking it parses as a preferences
    /// document. Nothing is persisted for an incorrect file.
    pub fn grant(&self, path: &Path) -> Result<Token, DaemonError> {
        if let Err(source) = parser::parse(path, self.provider()) {
            return Err(DaemonError::IncorrectFile {
                path: path.to_path_buf(),
                source,
            });
        }
        let token = self.provider.create_token(path)?;
        self.tokens.save(&token)?;
        tracing::info!(path = %token.path().display(), "access granted");
        Ok(token)
    }

    /// Forget the persisted token. Returns whether one was present.
    pub fn revoke(&self) -> Result<bool, DaemonError> {
        let removed = self.tokens.remove()?;
        if removed {
            tracing::info!("access revoked");
        }
        Ok(removed)
    }
}
