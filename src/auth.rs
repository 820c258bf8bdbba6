//! Built-in session authentication against the local sessions table.

use alloc::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest as _, Sha256};
use tracing::warn;

use crate::{
    config::Configuration,
    store::{Session, Store, StoreError, now_millis},
};

/// Resolves a bearer token to an authenticated user. The REST facade holds
/// this seam so the external SSO integration can replace the default.
#[async_trait]
pub trait WorkspaceAuthenticator: Send + Sync {
    /// Returns the user id when `token` grants access to the workspace.
    async fn authenticate(&self, token: &str, workspace_id: &str) -> Option<String>;
}

/// Digest form a password is stored in.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Session validation backed by the store, honoring the configured expiry.
pub struct Auth {
    store: Arc<dyn Store>,
    session_expire_secs: i64,
}

impl Auth {
    pub fn new(config: &Configuration, store: Arc<dyn Store>) -> Self {
        Self {
            store,
            session_expire_secs: config.session_expire_time_secs,
        }
    }

    /// Looks up a session by token, returning `None` for unknown or expired
    /// tokens.
    ///
    /// # Errors
    ///
    /// Fails only on an underlying store error.
    pub async fn get_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let Some(session) = self.store.get_session(token).await? else {
            return Ok(None);
        };
        let expires_at = session.update_at + self.session_expire_secs * 1000;
        if expires_at <= now_millis() {
            return Ok(None);
        }
        Ok(Some(session))
    }
}

#[async_trait]
impl WorkspaceAuthenticator for Auth {
    async fn authenticate(&self, token: &str, _workspace_id: &str) -> Option<String> {
        match self.get_session(token).await {
            Ok(session) => session.map(|s| s.user_id),
            Err(e) => {
                warn!("Session lookup failed during authentication: {e}");
                None
            }
        }
    }
}
