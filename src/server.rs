//! Process lifecycle orchestration.
//!
//! [`Server`] composes the subsystems in dependency order, runs the public
//! and (optionally) local admin transports, owns the session-cleanup task
//! and the telemetry job, and tears everything down in reverse order so no
//! background producer outlives the store.

use alloc::sync::Arc;
use core::time::Duration;
#[cfg(unix)]
use std::path::Path;
use std::io;

use axum::Router;
use secrecy::SecretString;
use serde_json::{Map, Value, json};
use thiserror::Error as ThisError;
use tracing::{error, info, warn};
use uuid::Uuid;

#[cfg(unix)]
use crate::local::LocalModeServer;
use crate::{
    api::Api,
    app::AppBuilder,
    auth::Auth,
    config::{AuthMode, Configuration, DEFAULT_PORT, DEFAULT_SERVER_ROOT},
    extauth::{self, ExternalAuthParams},
    files::FilesBackend,
    logging::{self, LogFormat},
    scheduler::{RecurringTask, create_recurring_task},
    store::{SqlStore, Store, StoreError, TELEMETRY_ID_SETTING, now_millis},
    telemetry::{HttpSender, TelemetryService, Tracker},
    web::WebServer,
    webhook,
    ws::WsServer,
};

/// How often expired sessions are purged.
const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Sessions younger than this are never purged, regardless of the
/// configured expiry.
const SESSION_RETENTION_FLOOR_SECS: i64 = 60 * 60 * 24 * 31;

/// Retention used by the cleanup task: the floor, or the configured expiry
/// when that is longer.
fn session_retention_secs(configured_expiry_secs: i64) -> i64 {
    SESSION_RETENTION_FLOOR_SECS.max(configured_expiry_secs)
}

type BoxedError = Box<dyn core::error::Error + Send + Sync>;

#[derive(Debug, ThisError)]
pub enum ServerError {
    /// A construction step failed. [`Server::new`] returns no partial
    /// server.
    #[error("initialization failed while {context}")]
    Initialization {
        context: &'static str,
        #[source]
        source: BoxedError,
    },
    /// A listener could not be bound or secured; fatal to [`Server::start`].
    #[error("failed to bind the {transport} transport")]
    TransportBind {
        transport: &'static str,
        #[source]
        source: io::Error,
    },
    /// Stopping a component failed. Teardown steps after the failing one are
    /// skipped.
    #[error("shutdown failed while {context}")]
    Shutdown {
        context: &'static str,
        #[source]
        source: BoxedError,
    },
}

fn init_error(context: &'static str, source: impl Into<BoxedError>) -> ServerError {
    ServerError::Initialization {
        context,
        source: source.into(),
    }
}

/// The composed application server.
pub struct Server {
    config: Arc<Configuration>,
    store: Arc<dyn Store>,
    web_server: WebServer,
    ws_server: WsServer,
    files_backend: Arc<FilesBackend>,
    telemetry: TelemetryService,
    api: Arc<Api>,
    app_builder: AppBuilder,
    local_router: Option<Router>,
    #[cfg(unix)]
    local_mode_server: Option<LocalModeServer>,
    clean_up_sessions_task: Option<RecurringTask>,
}

impl Server {
    /// Builds the full dependency graph. Construction is strictly
    /// sequential and fail-fast: the first error aborts and nothing is
    /// returned.
    ///
    /// # Errors
    ///
    /// Any failing construction step yields [`ServerError::Initialization`].
    pub async fn new(
        config: Configuration,
        single_user_token: Option<SecretString>,
    ) -> Result<Self, ServerError> {
        logging::init(LogFormat::default())
            .map_err(|e| init_error("initializing the logger", e))?;

        let store = SqlStore::open(
            &config.db_type,
            &config.db_config_string,
            &config.db_table_prefix,
        )
        .await
        .map_err(|e| {
            error!("Unable to open the database: {e}");
            init_error("opening the database", e)
        })?;

        Self::with_store(config, single_user_token, Arc::new(store)).await
    }

    /// Construction over an externally provided store. This is the seam
    /// lifecycle tests use to observe store interactions.
    ///
    /// # Errors
    ///
    /// Same failure policy as [`Server::new`].
    pub async fn with_store(
        config: Configuration,
        single_user_token: Option<SecretString>,
        store: Arc<dyn Store>,
    ) -> Result<Self, ServerError> {
        logging::init(LogFormat::default())
            .map_err(|e| init_error("initializing the logger", e))?;

        let config = Arc::new(config);
        let single_user_token = single_user_token.map(Arc::new);

        let auth = Arc::new(Auth::new(&config, store.clone()));

        let ws_server = WsServer::new(auth.clone(), single_user_token.clone());

        let files_backend = Arc::new(FilesBackend::new(&config.files_path).map_err(|e| {
            error!("Unable to initialize the files storage: {e}");
            init_error("initializing the files storage", e)
        })?);

        let webhook_client = webhook::Client::new(&config);

        let app_builder = AppBuilder::new(
            config.clone(),
            store.clone(),
            auth.clone(),
            ws_server.clone(),
            files_backend.clone(),
            webhook_client,
        );

        let api = Arc::new(Api::new(
            app_builder.clone(),
            auth,
            single_user_token.clone(),
            config.auth_mode,
        ));

        // Admin routes live on their own router, never on the public one.
        let local_router = api.register_admin_routes(Router::new());

        // Materialize the root workspace up front.
        app_builder
            .build()
            .get_root_workspace()
            .await
            .map_err(|e| init_error("materializing the root workspace", e))?;

        let web_server = WebServer::new(&config);
        web_server.add_routes(&ws_server);
        web_server.add_routes(&api);

        let telemetry_id = bootstrap_telemetry_id(store.as_ref())
            .await
            .map_err(|e| init_error("bootstrapping the telemetry id", e))?;

        let app = app_builder.build();
        let registered_users = app
            .get_registered_user_count()
            .await
            .map_err(|e| init_error("counting registered users", e))?;
        let daily_active_users = app
            .get_daily_active_users()
            .await
            .map_err(|e| init_error("counting daily active users", e))?;
        let weekly_active_users = app
            .get_weekly_active_users()
            .await
            .map_err(|e| init_error("counting weekly active users", e))?;
        let monthly_active_users = app
            .get_monthly_active_users()
            .await
            .map_err(|e| init_error("counting monthly active users", e))?;

        let telemetry = TelemetryService::new(telemetry_id, Arc::new(HttpSender::default()));
        register_trackers(
            &telemetry,
            &config,
            single_user_token.is_some(),
            UsageCounts {
                registered_users,
                daily_active_users,
                weekly_active_users,
                monthly_active_users,
            },
        );

        let mut server = Self {
            config,
            store,
            web_server,
            ws_server,
            files_backend,
            telemetry,
            api,
            app_builder,
            local_router: Some(local_router),
            #[cfg(unix)]
            local_mode_server: None,
            clean_up_sessions_task: None,
        };
        server.init_handlers();
        Ok(server)
    }

    /// Conditionally wires the external auth integration: only when the
    /// config selects it AND the build carries one. A selected mode without
    /// a compiled-in integration is a silent no-op so optional integrations
    /// stay pluggable.
    fn init_handlers(&mut self) {
        if self.config.auth_mode != AuthMode::Oidc {
            return;
        }
        let Some(factory) = extauth::capability() else {
            info!(
                "External auth selected but no integration is compiled in; keeping the native authenticator"
            );
            return;
        };
        let Some(ref oidc_cfg) = self.config.oidc else {
            warn!(
                "auth_mode is 'oidc' but the [oidc] config table is missing; keeping the native authenticator"
            );
            return;
        };

        let params = ExternalAuthParams {
            server_root: self.config.server_root.clone(),
            provider_url: oidc_cfg.provider_url.clone(),
            client_id: oidc_cfg.client_id.clone(),
            client_secret: oidc_cfg.client_secret.clone(),
            use_secure_cookie: self.config.secure_cookie,
        };
        match factory(params, self.store.clone()) {
            Ok(provider) => {
                info!("Using external OIDC authentication");
                self.web_server.add_routes(provider.as_ref());
                self.api.set_workspace_authenticator(provider);
            }
            Err(e) => {
                error!("Failed to construct the external auth integration: {e}");
            }
        }
    }

    /// Activates both transports and the background jobs. Returns as soon
    /// as the background units are launched.
    ///
    /// # Errors
    ///
    /// A listener that cannot be bound yields [`ServerError::TransportBind`]
    /// and aborts startup.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        info!("Server.start");

        self.web_server
            .start()
            .await
            .map_err(|source| ServerError::TransportBind {
                transport: "public",
                source,
            })?;

        if self.config.enable_local_mode {
            #[cfg(unix)]
            {
                if let Some(local_router) = self.local_router.take() {
                    let local = LocalModeServer::start(
                        local_router,
                        Path::new(&self.config.local_mode_socket_location),
                    )
                    .map_err(|source| ServerError::TransportBind {
                        transport: "local admin",
                        source,
                    })?;
                    self.local_mode_server = Some(local);
                }
            }
            #[cfg(not(unix))]
            warn!("Local admin mode is only supported on unix platforms");
        }

        let store = self.store.clone();
        let retention_secs = session_retention_secs(self.config.session_expire_time_secs);
        self.clean_up_sessions_task = Some(create_recurring_task(
            "clean_up_sessions",
            SESSION_CLEANUP_INTERVAL,
            move || {
                let store = store.clone();
                async move {
                    if let Err(e) = store.clean_up_sessions(retention_secs).await {
                        error!("Unable to clean up the sessions: {e}");
                    }
                }
            },
        ));

        if self.config.telemetry {
            self.telemetry.run_telemetry_job(now_millis());
        }

        Ok(())
    }

    /// Tears everything down: public transport first, then the local admin
    /// transport, then the background producers, finally the store. The
    /// order guarantees no scheduled work touches a closed store.
    ///
    /// # Errors
    ///
    /// A public transport stop failure aborts the remaining teardown; a
    /// store close failure is the overall result.
    pub async fn shutdown(&mut self) -> Result<(), ServerError> {
        self.web_server
            .shutdown()
            .await
            .map_err(|e| ServerError::Shutdown {
                context: "stopping the public transport",
                source: e.into(),
            })?;

        #[cfg(unix)]
        if let Some(local) = self.local_mode_server.take() {
            local.stop().await;
        }

        if let Some(task) = self.clean_up_sessions_task.take() {
            task.cancel().await;
        }

        self.telemetry.shutdown().await;

        info!("Server.shutdown");

        self.store
            .shutdown()
            .await
            .map_err(|e| ServerError::Shutdown {
                context: "closing the store",
                source: e.into(),
            })
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Builds a fresh application facade over the shared handles.
    pub fn app(&self) -> crate::app::App {
        self.app_builder.build()
    }

    pub fn ws_server(&self) -> &WsServer {
        &self.ws_server
    }

    pub fn files_backend(&self) -> &FilesBackend {
        &self.files_backend
    }

    /// Address the public listener is bound to, once started. Useful when
    /// the configured port is 0.
    pub fn public_addr(&self) -> Option<core::net::SocketAddr> {
        self.web_server.local_addr()
    }
}

/// First-run bootstrap of the telemetry identifier.
///
/// The conditional insert leaves a concurrently written value untouched and
/// the read-back returns whichever write won, so racing first starts settle
/// on a single id.
async fn bootstrap_telemetry_id(store: &dyn Store) -> Result<String, StoreError> {
    let settings = store.get_system_settings().await?;
    match settings.get(TELEMETRY_ID_SETTING) {
        Some(id) if !id.is_empty() => return Ok(id.clone()),
        Some(_) => {
            // an empty row carries no identity, overwrite it
            store
                .set_system_setting(TELEMETRY_ID_SETTING, &Uuid::new_v4().to_string())
                .await?;
        }
        None => {
            store
                .ensure_system_setting(TELEMETRY_ID_SETTING, &Uuid::new_v4().to_string())
                .await?;
        }
    }

    let settings = store.get_system_settings().await?;
    settings
        .get(TELEMETRY_ID_SETTING)
        .cloned()
        .ok_or_else(|| StoreError::NotFound(TELEMETRY_ID_SETTING.to_string()))
}

struct UsageCounts {
    registered_users: i64,
    daily_active_users: i64,
    weekly_active_users: i64,
    monthly_active_users: i64,
}

fn tracker_map(value: Value) -> eyre::Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(eyre::eyre!("tracker produced a non-object value: {other}")),
    }
}

fn register_trackers(
    telemetry: &TelemetryService,
    config: &Arc<Configuration>,
    single_user: bool,
    counts: UsageCounts,
) {
    let server_tracker: Tracker = Box::new(|| {
        tracker_map(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "operating_system": std::env::consts::OS,
            "edition": "community",
        }))
    });
    telemetry.register_tracker("server", server_tracker);

    let config = config.clone();
    let config_tracker: Tracker = Box::new(move || {
        tracker_map(json!({
            "server_root_default": config.server_root == DEFAULT_SERVER_ROOT,
            "port_default": config.port == DEFAULT_PORT,
            "use_tls": config.tls.as_ref().is_some_and(|tls| tls.enable),
            "db_type": config.db_type,
            "single_user": single_user,
        }))
    });
    telemetry.register_tracker("config", config_tracker);

    let activity_tracker: Tracker = Box::new(move || {
        tracker_map(json!({
            "registered_users": counts.registered_users,
            "daily_active_users": counts.daily_active_users,
            "weekly_active_users": counts.weekly_active_users,
            "monthly_active_users": counts.monthly_active_users,
        }))
    });
    telemetry.register_tracker("activity", activity_tracker);
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::collections::HashMap;

    use async_trait::async_trait;
    use tokio::time::sleep;

    use super::*;
    use crate::store::{Session, User, Workspace};

    fn test_config(files_dir: &tempfile::TempDir) -> Configuration {
        Configuration {
            port: 0,
            local_only: true,
            telemetry: false,
            files_path: files_dir
                .path()
                .join("files")
                .to_str()
                .expect("utf8 path")
                .to_string(),
            db_config_string: ":memory:".to_string(),
            ..Configuration::default()
        }
    }

    async fn memory_store() -> Arc<dyn Store> {
        Arc::new(
            SqlStore::open("sqlite3", ":memory:", "")
                .await
                .expect("store should open"),
        )
    }

    #[test]
    fn session_retention_honors_the_floor() {
        let forty_days = 60 * 60 * 24 * 40;
        let ten_days = 60 * 60 * 24 * 10;
        assert_eq!(session_retention_secs(forty_days), forty_days);
        assert_eq!(session_retention_secs(ten_days), SESSION_RETENTION_FLOOR_SECS);
    }

    #[tokio::test]
    async fn first_run_generates_a_telemetry_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = memory_store().await;
        let _server = Server::with_store(test_config(&dir), None, store.clone())
            .await
            .unwrap();

        let settings = store.get_system_settings().await.unwrap();
        let id = settings.get(TELEMETRY_ID_SETTING).expect("id persisted");
        assert!(!id.is_empty());
        uuid::Uuid::parse_str(id).expect("id should be a valid uuid");
    }

    #[tokio::test]
    async fn existing_telemetry_id_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = memory_store().await;
        store
            .set_system_setting(TELEMETRY_ID_SETTING, "pre-existing")
            .await
            .unwrap();

        let _server = Server::with_store(test_config(&dir), None, store.clone())
            .await
            .unwrap();

        let settings = store.get_system_settings().await.unwrap();
        assert_eq!(
            settings.get(TELEMETRY_ID_SETTING).map(String::as_str),
            Some("pre-existing")
        );
    }

    #[tokio::test]
    async fn construction_fails_on_unusable_files_path() {
        let dir = tempfile::tempdir().unwrap();
        // a plain file where the directory should go
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();

        let config = Configuration {
            files_path: blocker
                .join("files")
                .to_str()
                .expect("utf8 path")
                .to_string(),
            ..test_config(&dir)
        };
        let result = Server::with_store(config, None, memory_store().await).await;
        assert!(matches!(
            result,
            Err(ServerError::Initialization { .. })
        ));
    }

    /// Store wrapper recording whether any session cleanup ran after the
    /// store was closed.
    struct RecordingStore {
        inner: Arc<dyn Store>,
        closed: AtomicBool,
        cleanup_calls: AtomicUsize,
        used_after_close: AtomicBool,
    }

    impl RecordingStore {
        async fn new() -> Self {
            Self {
                inner: memory_store().await,
                closed: AtomicBool::new(false),
                cleanup_calls: AtomicUsize::new(0),
                used_after_close: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Store for RecordingStore {
        async fn get_system_settings(&self) -> Result<HashMap<String, String>, StoreError> {
            self.inner.get_system_settings().await
        }
        async fn set_system_setting(&self, id: &str, value: &str) -> Result<(), StoreError> {
            self.inner.set_system_setting(id, value).await
        }
        async fn ensure_system_setting(&self, id: &str, value: &str) -> Result<(), StoreError> {
            self.inner.ensure_system_setting(id, value).await
        }
        async fn get_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
            self.inner.get_session(token).await
        }
        async fn create_session(&self, session: &Session) -> Result<(), StoreError> {
            self.inner.create_session(session).await
        }
        async fn clean_up_sessions(&self, older_than_secs: i64) -> Result<(), StoreError> {
            self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
            if self.closed.load(Ordering::SeqCst) {
                self.used_after_close.store(true, Ordering::SeqCst);
            }
            self.inner.clean_up_sessions(older_than_secs).await
        }
        async fn create_user(&self, user: &User) -> Result<(), StoreError> {
            self.inner.create_user(user).await
        }
        async fn update_user_password(
            &self,
            username: &str,
            password_hash: &str,
        ) -> Result<(), StoreError> {
            self.inner.update_user_password(username, password_hash).await
        }
        async fn get_registered_user_count(&self) -> Result<i64, StoreError> {
            self.inner.get_registered_user_count().await
        }
        async fn get_active_user_count(&self, window_secs: i64) -> Result<i64, StoreError> {
            self.inner.get_active_user_count(window_secs).await
        }
        async fn get_root_workspace(&self) -> Result<Workspace, StoreError> {
            self.inner.get_root_workspace().await
        }
        async fn shutdown(&self) -> Result<(), StoreError> {
            self.closed.store(true, Ordering::SeqCst);
            self.inner.shutdown().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_cleanup_task_before_closing_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordingStore::new().await);
        let mut server = Server::with_store(test_config(&dir), None, store.clone())
            .await
            .unwrap();

        server.start().await.unwrap();
        sleep(SESSION_CLEANUP_INTERVAL + Duration::from_secs(1)).await;
        assert!(
            store.cleanup_calls.load(Ordering::SeqCst) >= 1,
            "cleanup task should have fired while running"
        );

        server.shutdown().await.unwrap();
        assert!(store.closed.load(Ordering::SeqCst));

        sleep(3 * SESSION_CLEANUP_INTERVAL).await;
        assert!(
            !store.used_after_close.load(Ordering::SeqCst),
            "no cleanup tick may touch the store after shutdown"
        );
    }

    #[tokio::test]
    async fn start_and_shutdown_roundtrip_serves_the_public_api() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Server::with_store(test_config(&dir), None, memory_store().await)
            .await
            .unwrap();
        server.start().await.unwrap();
        let addr = server.public_addr().expect("listener bound");

        let status = reqwest::get(format!("http://{addr}/api/v1/ping"))
            .await
            .unwrap()
            .status();
        assert_eq!(status, reqwest::StatusCode::OK);

        server.shutdown().await.unwrap();
    }
}
