//! Persistence boundary for the tackboard server.
//!
//! The orchestrator and the application facade talk to storage exclusively
//! through the [`Store`] trait so tests can substitute recording fakes. The
//! production implementation is [`SqlStore`] backed by SQLite.

mod sqlstore;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error as ThisError;

pub use sqlstore::SqlStore;

/// Key under which the process-wide telemetry identifier is persisted.
pub const TELEMETRY_ID_SETTING: &str = "TelemetryID";

#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("unsupported database driver '{0}', only sqlite3 is supported")]
    UnsupportedDriver(String),
    #[error("invalid table prefix '{0}', only alphanumerics and underscores are allowed")]
    InvalidTablePrefix(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

/// An authenticated session row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub token: String,
    pub user_id: String,
    pub create_at: i64,
    pub update_at: i64,
}

/// A workspace row. The root workspace has the fixed id `"0"`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Workspace {
    pub id: String,
    pub title: String,
    pub update_at: i64,
}

/// A user row, as far as the lifecycle layer needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub create_at: i64,
}

/// Narrow persistence interface consumed by the server core.
///
/// Implementations must be safe for concurrent use; the store handle is
/// shared between request handlers and background tasks.
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns every stored system setting. An empty table yields an empty
    /// map, not an error.
    async fn get_system_settings(&self) -> Result<HashMap<String, String>, StoreError>;

    /// Unconditional insert-or-overwrite. Last write wins.
    async fn set_system_setting(&self, id: &str, value: &str) -> Result<(), StoreError>;

    /// Conditional insert: existing rows are left untouched. Used for
    /// first-run bootstrap values that must never change once written.
    async fn ensure_system_setting(&self, id: &str, value: &str) -> Result<(), StoreError>;

    async fn get_session(&self, token: &str) -> Result<Option<Session>, StoreError>;

    async fn create_session(&self, session: &Session) -> Result<(), StoreError>;

    /// Deletes sessions whose last update is older than the given number of
    /// seconds.
    async fn clean_up_sessions(&self, older_than_secs: i64) -> Result<(), StoreError>;

    async fn create_user(&self, user: &User) -> Result<(), StoreError>;

    async fn update_user_password(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<(), StoreError>;

    async fn get_registered_user_count(&self) -> Result<i64, StoreError>;

    /// Number of distinct users with session activity inside the window.
    async fn get_active_user_count(&self, window_secs: i64) -> Result<i64, StoreError>;

    /// Returns the root workspace, creating it when absent.
    async fn get_root_workspace(&self) -> Result<Workspace, StoreError>;

    /// Closes the underlying handle. Idempotent.
    async fn shutdown(&self) -> Result<(), StoreError>;
}

/// Milliseconds since the unix epoch, the timestamp unit of every table.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
