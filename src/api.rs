//! REST facade for the public transport, plus the privileged admin routes
//! served only on the local transport.

use alloc::sync::Arc;
use std::sync::RwLock;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use hyper::StatusCode;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::{
    app::AppBuilder,
    auth::WorkspaceAuthenticator,
    config::AuthMode,
    store::StoreError,
    web::RouteProvider,
};

/// User id reported for requests authenticated via the bypass token.
const SINGLE_USER_ID: &str = "single-user";

/// Id of the only workspace this server edition exposes.
const ROOT_WORKSPACE_ID: &str = "0";

/// REST API facade. The workspace authenticator defaults to the built-in
/// session auth and may be replaced by an external integration.
pub struct Api {
    app_builder: AppBuilder,
    single_user_token: Option<Arc<SecretString>>,
    auth_mode: AuthMode,
    workspace_authenticator: RwLock<Arc<dyn WorkspaceAuthenticator>>,
}

impl Api {
    pub fn new(
        app_builder: AppBuilder,
        default_authenticator: Arc<dyn WorkspaceAuthenticator>,
        single_user_token: Option<Arc<SecretString>>,
        auth_mode: AuthMode,
    ) -> Self {
        Self {
            app_builder,
            single_user_token,
            auth_mode,
            workspace_authenticator: RwLock::new(default_authenticator),
        }
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    /// Replaces the workspace authenticator. Called by the external-auth
    /// wiring during construction.
    pub fn set_workspace_authenticator(&self, authenticator: Arc<dyn WorkspaceAuthenticator>) {
        let mut guard = self
            .workspace_authenticator
            .write()
            .unwrap_or_else(|e| e.into_inner());
        *guard = authenticator;
    }

    /// Registers the privileged admin routes. These must only ever be bound
    /// to the local transport's router.
    pub fn register_admin_routes(self: &Arc<Self>, router: Router) -> Router {
        let admin = Router::new()
            .route(
                "/api/v1/admin/users/{username}/password",
                post(handle_admin_set_password),
            )
            .with_state(self.clone());
        router.merge(admin)
    }

    async fn authenticate(&self, token: &str) -> Option<String> {
        if let Some(ref expected) = self.single_user_token {
            if !token.is_empty() && token == expected.expose_secret() {
                return Some(SINGLE_USER_ID.to_string());
            }
            return None;
        }
        let authenticator = {
            self.workspace_authenticator
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        };
        authenticator.authenticate(token, ROOT_WORKSPACE_ID).await
    }
}

impl RouteProvider for Arc<Api> {
    fn routes(&self) -> Router {
        Router::new()
            .route("/api/v1/ping", get(handle_ping))
            .route("/api/v1/workspace", get(handle_get_workspace))
            .with_state(self.clone())
    }
}

#[derive(Serialize)]
struct PingResponse {
    version: &'static str,
    operating_system: &'static str,
}

async fn handle_ping() -> impl IntoResponse {
    Json(PingResponse {
        version: env!("CARGO_PKG_VERSION"),
        operating_system: std::env::consts::OS,
    })
}

fn bearer_token(header: Option<&TypedHeader<Authorization<Bearer>>>) -> &str {
    header.map(|h| h.token()).unwrap_or_default()
}

#[axum::debug_handler]
async fn handle_get_workspace(
    State(api): State<Arc<Api>>,
    auth_header: Option<TypedHeader<Authorization<Bearer>>>,
) -> Response {
    if api.authenticate(bearer_token(auth_header.as_ref())).await.is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match api.app_builder.build().get_root_workspace().await {
        Ok(workspace) => Json(workspace).into_response(),
        Err(e) => {
            error!("Failed to load root workspace: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Deserialize)]
struct SetPasswordBody {
    password: String,
}

/// Admin-only: reset a user's password. Reachable exclusively through the
/// local transport, so no further authentication happens here.
#[axum::debug_handler]
async fn handle_admin_set_password(
    Path(username): Path<String>,
    State(api): State<Arc<Api>>,
    Json(body): Json<SetPasswordBody>,
) -> Response {
    match api
        .app_builder
        .build()
        .update_user_password(&username, &body.password)
        .await
    {
        Ok(()) => StatusCode::OK.into_response(),
        Err(StoreError::NotFound(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("Failed to set password for '{username}': {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use hyper::Request;
    use tower::ServiceExt as _;

    use super::*;
    use crate::{
        auth::Auth,
        config::Configuration,
        files::FilesBackend,
        store::{SqlStore, Store, User, now_millis},
        webhook,
        ws::WsServer,
    };

    async fn test_api(single_user_token: Option<&str>) -> (Arc<Api>, Arc<dyn Store>) {
        let config = Arc::new(Configuration::default());
        let store: Arc<dyn Store> = Arc::new(
            SqlStore::open("sqlite3", ":memory:", "")
                .await
                .expect("store should open"),
        );
        let auth = Arc::new(Auth::new(&config, store.clone()));
        let ws = WsServer::new(auth.clone(), None);
        let dir = tempfile::tempdir().expect("tempdir");
        let files = Arc::new(
            FilesBackend::new(dir.path().to_str().expect("utf8 path")).expect("files backend"),
        );
        let webhook = webhook::Client::new(&config);
        let builder = AppBuilder::new(config, store.clone(), auth.clone(), ws, files, webhook);
        let token = single_user_token.map(|t| Arc::new(SecretString::from(t)));
        (
            Arc::new(Api::new(builder, auth, token, AuthMode::Native)),
            store,
        )
    }

    #[tokio::test]
    async fn ping_is_public() {
        let (api, _store) = test_api(None).await;
        let response = api
            .routes()
            .oneshot(Request::get("/api/v1/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn workspace_requires_authentication() {
        let (api, _store) = test_api(None).await;
        let response = api
            .routes()
            .oneshot(
                Request::get("/api/v1/workspace")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn bypass_token_grants_workspace_access() {
        let (api, _store) = test_api(Some("hunter2")).await;
        let response = api
            .routes()
            .oneshot(
                Request::get("/api/v1/workspace")
                    .header("Authorization", "Bearer hunter2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_routes_are_absent_from_the_public_router() {
        let (api, _store) = test_api(None).await;
        let response = api
            .routes()
            .oneshot(
                Request::post("/api/v1/admin/users/alice/password")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"password": "x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn public_routes_are_absent_from_the_admin_router() {
        let (api, _store) = test_api(None).await;
        let admin = api.register_admin_routes(Router::new());
        let response = admin
            .oneshot(Request::get("/api/v1/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn admin_set_password_updates_existing_users_only() {
        let (api, store) = test_api(None).await;
        let admin = api.register_admin_routes(Router::new());

        let request = |username: &str| {
            Request::post(format!("/api/v1/admin/users/{username}/password"))
                .header("Content-Type", "application/json")
                .body(Body::from(r#"{"password": "correct horse"}"#))
                .unwrap()
        };

        let response = admin.clone().oneshot(request("ghost")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        store
            .create_user(&User {
                id: "u1".to_string(),
                username: "alice".to_string(),
                create_at: now_millis(),
            })
            .await
            .unwrap();
        let response = admin.oneshot(request("alice")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
