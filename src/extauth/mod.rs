//! Optional external SSO integration.
//!
//! A build may or may not carry an integration (cargo feature `oidc`). The
//! orchestrator branches on [`capability`] being present: when it is, the
//! integration's routes land on the public transport and it replaces the
//! REST facade's authenticator; when it is absent, selecting the external
//! auth mode in the config is a silent no-op.

#[cfg(feature = "oidc")]
mod oidc;

use alloc::sync::Arc;

use secrecy::SecretString;

use crate::{auth::WorkspaceAuthenticator, store::Store, web::RouteProvider};

/// Construction inputs for an external auth integration.
#[derive(Clone)]
pub struct ExternalAuthParams {
    pub server_root: String,
    pub provider_url: String,
    pub client_id: String,
    pub client_secret: Arc<SecretString>,
    pub use_secure_cookie: bool,
}

/// An external auth integration: contributes its login routes to the public
/// transport and authenticates workspace access.
pub trait ExternalAuthProvider: WorkspaceAuthenticator + RouteProvider + Send + Sync {}

/// Constructor for the integration compiled into this build.
pub type ProviderFactory =
    fn(ExternalAuthParams, Arc<dyn Store>) -> eyre::Result<Arc<dyn ExternalAuthProvider>>;

/// The integration compiled into this build, if any.
pub fn capability() -> Option<ProviderFactory> {
    #[cfg(feature = "oidc")]
    {
        Some(|params, store| Ok(Arc::new(oidc::OidcAuthProvider::new(params, store))))
    }
    #[cfg(not(feature = "oidc"))]
    {
        None
    }
}
