//! Application facade over the shared subsystem handles.
//!
//! [`AppBuilder`] is the explicit factory: every `build` call yields a fresh
//! [`App`] sharing the underlying config, store, auth, websocket, files, and
//! webhook handles.

use alloc::sync::Arc;

use crate::{
    auth::{Auth, hash_password},
    config::Configuration,
    files::FilesBackend,
    store::{Store, StoreError, Workspace},
    webhook,
    ws::WsServer,
};

const DAY_SECS: i64 = 60 * 60 * 24;

/// One application facade instance. Cheap to construct, holds only shared
/// handles.
pub struct App {
    config: Arc<Configuration>,
    store: Arc<dyn Store>,
    auth: Arc<Auth>,
    ws: WsServer,
    files: Arc<FilesBackend>,
    webhook: webhook::Client,
}

impl App {
    /// Returns the root workspace, creating it on first access.
    ///
    /// # Errors
    ///
    /// Fails on any store error.
    pub async fn get_root_workspace(&self) -> Result<Workspace, StoreError> {
        self.store.get_root_workspace().await
    }

    /// # Errors
    ///
    /// Fails on any store error.
    pub async fn get_registered_user_count(&self) -> Result<i64, StoreError> {
        self.store.get_registered_user_count().await
    }

    /// # Errors
    ///
    /// Fails on any store error.
    pub async fn get_daily_active_users(&self) -> Result<i64, StoreError> {
        self.store.get_active_user_count(DAY_SECS).await
    }

    /// # Errors
    ///
    /// Fails on any store error.
    pub async fn get_weekly_active_users(&self) -> Result<i64, StoreError> {
        self.store.get_active_user_count(7 * DAY_SECS).await
    }

    /// # Errors
    ///
    /// Fails on any store error.
    pub async fn get_monthly_active_users(&self) -> Result<i64, StoreError> {
        self.store.get_active_user_count(30 * DAY_SECS).await
    }

    /// # Errors
    ///
    /// Fails when the user does not exist or on any store error.
    pub async fn update_user_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(), StoreError> {
        self.store
            .update_user_password(username, &hash_password(password))
            .await
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    pub fn ws(&self) -> &WsServer {
        &self.ws
    }

    pub fn files(&self) -> &FilesBackend {
        &self.files
    }

    pub fn webhook(&self) -> &webhook::Client {
        &self.webhook
    }
}

/// Explicit factory producing a fresh facade per call over shared resources.
#[derive(Clone)]
pub struct AppBuilder {
    config: Arc<Configuration>,
    store: Arc<dyn Store>,
    auth: Arc<Auth>,
    ws: WsServer,
    files: Arc<FilesBackend>,
    webhook: webhook::Client,
}

impl AppBuilder {
    pub fn new(
        config: Arc<Configuration>,
        store: Arc<dyn Store>,
        auth: Arc<Auth>,
        ws: WsServer,
        files: Arc<FilesBackend>,
        webhook: webhook::Client,
    ) -> Self {
        Self {
            config,
            store,
            auth,
            ws,
            files,
            webhook,
        }
    }

    /// Builds a new facade instance. Each call yields an independent value
    /// sharing the underlying handles.
    pub fn build(&self) -> App {
        App {
            config: self.config.clone(),
            store: self.store.clone(),
            auth: self.auth.clone(),
            ws: self.ws.clone(),
            files: self.files.clone(),
            webhook: self.webhook.clone(),
        }
    }
}
