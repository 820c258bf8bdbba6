//! OIDC-based external auth: authorization code flow with PKCE, backed by
//! the provider configured in the `[oidc]` config table.
//!
//! Successful logins materialize a regular session row, so the rest of the
//! server treats externally authenticated users exactly like native ones.

use alloc::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    extract::{FromRef, Query, State},
    response::{IntoResponse as _, Redirect, Response},
    routing::get,
};
use axum_extra::extract::cookie::{Cookie, Key, SignedCookieJar};
use cookie::{SameSite, time::Duration as CookieDuration};
use eyre::{WrapErr as _, eyre};
use openidconnect::{
    AuthorizationCode, ClientId, ClientSecret, CsrfToken, IssuerUrl, Nonce, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, Scope, TokenResponse as _,
    core::{CoreAuthenticationFlow, CoreClient, CoreProviderMetadata},
};
use secrecy::ExposeSecret as _;
use serde::Deserialize;
use tracing::{info, warn};

use super::{ExternalAuthParams, ExternalAuthProvider};
use crate::{
    auth::WorkspaceAuthenticator,
    store::{Session, Store, User, now_millis},
    web::RouteProvider,
};

const CALLBACK_PATH: &str = "/oidc/callback";

const COOKIE_STATE: &str = "oidc_state";
const COOKIE_NONCE: &str = "oidc_nonce";
const COOKIE_PKCE: &str = "oidc_pkce";
const COOKIE_SESSION: &str = "tackboard_session";

/// External authenticator backed by an OIDC provider.
#[derive(Clone)]
pub struct OidcAuthProvider {
    inner: Arc<Inner>,
}

struct Inner {
    params: ExternalAuthParams,
    store: Arc<dyn Store>,
    cookie_key: Key,
    http: reqwest::Client,
}

impl OidcAuthProvider {
    pub fn new(params: ExternalAuthParams, store: Arc<dyn Store>) -> Self {
        Self {
            inner: Arc::new(Inner {
                params,
                store,
                cookie_key: Key::generate(),
                http: reqwest::Client::new(),
            }),
        }
    }
}

impl ExternalAuthProvider for OidcAuthProvider {}

#[async_trait]
impl WorkspaceAuthenticator for OidcAuthProvider {
    async fn authenticate(&self, token: &str, _workspace_id: &str) -> Option<String> {
        match self.inner.store.get_session(token).await {
            Ok(session) => session.map(|s| s.user_id),
            Err(e) => {
                warn!("Session lookup failed during external authentication: {e}");
                None
            }
        }
    }
}

impl RouteProvider for OidcAuthProvider {
    fn routes(&self) -> Router {
        Router::new()
            .route("/oidc/login", get(handle_login))
            .route(CALLBACK_PATH, get(handle_callback))
            .with_state(self.clone())
    }
}

impl FromRef<OidcAuthProvider> for Key {
    fn from_ref(provider: &OidcAuthProvider) -> Self {
        provider.inner.cookie_key.clone()
    }
}

impl Inner {
    /// Discovers the provider and returns a client ready for the
    /// authorization code flow.
    async fn build_client(
        &self,
    ) -> eyre::Result<
        CoreClient<
            openidconnect::EndpointSet,
            openidconnect::EndpointNotSet,
            openidconnect::EndpointNotSet,
            openidconnect::EndpointNotSet,
            openidconnect::EndpointSet,
            openidconnect::EndpointMaybeSet,
        >,
    > {
        let issuer = IssuerUrl::new(self.params.provider_url.clone())
            .wrap_err("invalid OIDC provider URL")?;
        let metadata = CoreProviderMetadata::discover_async(issuer, &self.http)
            .await
            .wrap_err("OIDC discovery failed")?;

        let token_endpoint = metadata
            .token_endpoint()
            .cloned()
            .ok_or_else(|| eyre!("OIDC provider is missing a token endpoint"))?;
        let auth_endpoint = metadata.authorization_endpoint().clone();

        let redirect = RedirectUrl::new(format!(
            "{}{CALLBACK_PATH}",
            self.params.server_root.trim_end_matches('/'),
        ))?;

        Ok(CoreClient::from_provider_metadata(
            metadata,
            ClientId::new(self.params.client_id.clone()),
            Some(ClientSecret::new(
                self.params.client_secret.expose_secret().to_string(),
            )),
        )
        .set_auth_uri(auth_endpoint)
        .set_token_uri(token_endpoint)
        .set_redirect_uri(redirect))
    }

    fn ephemeral_cookie(&self, name: &'static str, value: String) -> Cookie<'static> {
        Cookie::build((name, value))
            .http_only(true)
            .secure(self.params.use_secure_cookie)
            .same_site(SameSite::Lax)
            .max_age(CookieDuration::minutes(10))
            .path("/")
            .build()
    }
}

async fn handle_login(State(provider): State<OidcAuthProvider>, jar: SignedCookieJar) -> Response {
    let inner = &provider.inner;
    let client = match inner.build_client().await {
        Ok(client) => client,
        Err(e) => {
            warn!("Failed to initiate OIDC login: {e}");
            return hyper::StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
    let (auth_url, csrf_token, nonce) = client
        .authorize_url(
            CoreAuthenticationFlow::AuthorizationCode,
            CsrfToken::new_random,
            Nonce::new_random,
        )
        .add_scope(Scope::new("openid".to_string()))
        .add_scope(Scope::new("profile".to_string()))
        .set_pkce_challenge(pkce_challenge)
        .url();

    let jar = jar
        .add(inner.ephemeral_cookie(COOKIE_STATE, csrf_token.secret().clone()))
        .add(inner.ephemeral_cookie(COOKIE_NONCE, nonce.secret().clone()))
        .add(inner.ephemeral_cookie(COOKIE_PKCE, pkce_verifier.secret().clone()));

    info!("Redirecting to external auth provider");
    (jar, Redirect::to(auth_url.as_str())).into_response()
}

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
}

async fn handle_callback(
    State(provider): State<OidcAuthProvider>,
    Query(params): Query<CallbackParams>,
    jar: SignedCookieJar,
) -> Response {
    let inner = &provider.inner;

    let (Some(code), Some(state)) = (params.code, params.state) else {
        warn!("OIDC callback missing code or state");
        return hyper::StatusCode::BAD_REQUEST.into_response();
    };
    let state_matches = jar
        .get(COOKIE_STATE)
        .is_some_and(|cookie| cookie.value() == state);
    if !state_matches {
        warn!("OIDC callback state mismatch");
        return hyper::StatusCode::BAD_REQUEST.into_response();
    }
    let Some(pkce) = jar.get(COOKIE_PKCE).map(|c| c.value().to_string()) else {
        warn!("OIDC callback missing PKCE verifier cookie");
        return hyper::StatusCode::BAD_REQUEST.into_response();
    };
    let nonce = jar.get(COOKIE_NONCE).map(|c| c.value().to_string());

    let session = match complete_login(inner, code, pkce, nonce).await {
        Ok(session) => session,
        Err(e) => {
            warn!("OIDC login failed: {e}");
            return hyper::StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let jar = jar
        .remove(Cookie::build(COOKIE_STATE).path("/").build())
        .remove(Cookie::build(COOKIE_NONCE).path("/").build())
        .remove(Cookie::build(COOKIE_PKCE).path("/").build())
        .add(
            Cookie::build((COOKIE_SESSION, session.token))
                .http_only(true)
                .secure(inner.params.use_secure_cookie)
                .same_site(SameSite::Lax)
                .path("/")
                .build(),
        );

    (jar, Redirect::to("/")).into_response()
}

/// Exchanges the authorization code, validates the id token, and
/// materializes a user + session for the authenticated subject.
async fn complete_login(
    inner: &Inner,
    code: String,
    pkce: String,
    nonce: Option<String>,
) -> eyre::Result<Session> {
    let client = inner.build_client().await?;
    let tokens = client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(PkceCodeVerifier::new(pkce))
        .request_async(&inner.http)
        .await
        .wrap_err("token exchange failed")?;

    let id_token = tokens
        .id_token()
        .ok_or_else(|| eyre!("provider returned no id token"))?;
    let nonce = Nonce::new(nonce.ok_or_else(|| eyre!("missing nonce cookie"))?);
    let claims = id_token
        .claims(&client.id_token_verifier(), &nonce)
        .wrap_err("id token validation failed")?;
    let subject = claims.subject().to_string();

    // Subjects double as user ids; first login creates the user row.
    let now = now_millis();
    if let Err(e) = inner
        .store
        .create_user(&User {
            id: subject.clone(),
            username: subject.clone(),
            create_at: now,
        })
        .await
    {
        // returning users hit the unique constraint, which is fine
        tracing::debug!("User row not created: {e}");
    }

    let session = Session {
        id: uuid::Uuid::new_v4().to_string(),
        token: uuid::Uuid::new_v4().to_string(),
        user_id: subject,
        create_at: now,
        update_at: now,
    };
    inner.store.create_session(&session).await?;
    info!(user = %session.user_id, "External auth login succeeded");
    Ok(session)
}
