//! Configuration data types for the tackboard server.

use alloc::sync::Arc;

use secrecy::{ExposeSecret as _, SecretString};
use serde::Deserialize;

/// Default public URL clients use to reach the server.
pub const DEFAULT_SERVER_ROOT: &str = "http://localhost:8000";

/// Default TCP port of the public transport.
pub const DEFAULT_PORT: u16 = 8000;

/// TLS settings for the public transport.
///
/// Paths are interpreted relative to the working directory when not absolute.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TlsConfig {
    /// Path to a certificate PEM file.
    #[serde(default = "relative_cert_path")]
    pub cert_path: String,

    /// Path to a private key PEM file.
    #[serde(default = "relative_key_path")]
    pub key_path: String,

    /// Whether TLS is enabled. When false the server serves plain HTTP even
    /// if the `tls` table is present. Defaults to true.
    #[serde(default = "do_tls_enable")]
    pub enable: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: relative_cert_path(),
            key_path: relative_key_path(),
            enable: do_tls_enable(),
        }
    }
}

fn relative_cert_path() -> String {
    "./tls_cert.pem".to_string()
}

fn relative_key_path() -> String {
    "./tls_key.pem".to_string()
}

const fn do_tls_enable() -> bool {
    true
}

/// Supported authentication modes for the public API.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Built-in session authentication against the local user table.
    #[default]
    Native,
    /// Delegate authentication to an external OIDC provider. Only effective
    /// when the build carries the `oidc` feature; otherwise the server keeps
    /// the native authenticator.
    Oidc,
}

/// Connection settings for an external OIDC provider.
#[derive(Debug, Deserialize, Clone)]
pub struct OidcConfig {
    /// Base URL of the provider (issuer).
    pub provider_url: String,
    #[serde(default = "default_oidc_client_id")]
    pub client_id: String,
    pub client_secret: Arc<SecretString>,
}

impl PartialEq for OidcConfig {
    fn eq(&self, other: &Self) -> bool {
        self.provider_url == other.provider_url
            && self.client_id == other.client_id
            && self.client_secret.expose_secret() == other.client_secret.expose_secret()
    }
}

fn default_oidc_client_id() -> String {
    "tackboard".to_string()
}

/// Root config structure for the server.
///
/// Every field has a default so an empty file yields a runnable local setup.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Configuration {
    /// Public URL clients use to reach the server.
    #[serde(default = "default_server_root")]
    pub server_root: String,

    /// TCP port of the public transport.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Restrict the public transport to loopback interfaces.
    #[serde(default)]
    pub local_only: bool,

    /// Optional TLS configuration for serving HTTPS.
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Directory the static web app is served from.
    #[serde(default = "default_web_path")]
    pub web_path: String,

    /// Directory uploaded files are stored in.
    #[serde(default = "default_files_path")]
    pub files_path: String,

    /// Database driver. Only `sqlite3` is supported.
    #[serde(default = "default_db_type")]
    pub db_type: String,

    /// Driver-specific connection string (a file path for sqlite3).
    #[serde(default = "default_db_config")]
    pub db_config_string: String,

    /// Prefix prepended to every table name.
    #[serde(default)]
    pub db_table_prefix: String,

    /// Whether anonymous usage telemetry is reported.
    #[serde(default = "do_telemetry")]
    pub telemetry: bool,

    /// Session lifetime in seconds.
    #[serde(default = "default_session_expire_secs")]
    pub session_expire_time_secs: i64,

    /// Authentication mode for the public API.
    #[serde(default)]
    pub auth_mode: AuthMode,

    /// Set the Secure attribute on authentication cookies.
    #[serde(default)]
    pub secure_cookie: bool,

    /// Optional external OIDC provider, consulted when `auth_mode = "oidc"`.
    #[serde(default)]
    pub oidc: Option<OidcConfig>,

    /// Serve privileged admin routes on a local unix socket.
    #[serde(default)]
    pub enable_local_mode: bool,

    /// Path of the local admin unix socket.
    #[serde(default = "default_local_socket")]
    pub local_mode_socket_location: String,

    /// Webhook URLs notified on board changes.
    #[serde(default)]
    pub webhook_update: Vec<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            server_root: default_server_root(),
            port: default_port(),
            local_only: false,
            tls: None,
            web_path: default_web_path(),
            files_path: default_files_path(),
            db_type: default_db_type(),
            db_config_string: default_db_config(),
            db_table_prefix: String::new(),
            telemetry: do_telemetry(),
            session_expire_time_secs: default_session_expire_secs(),
            auth_mode: AuthMode::default(),
            secure_cookie: false,
            oidc: None,
            enable_local_mode: false,
            local_mode_socket_location: default_local_socket(),
            webhook_update: Vec::new(),
        }
    }
}

fn default_server_root() -> String {
    DEFAULT_SERVER_ROOT.to_string()
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_web_path() -> String {
    "./pack".to_string()
}

fn default_files_path() -> String {
    "./files".to_string()
}

fn default_db_type() -> String {
    "sqlite3".to_string()
}

fn default_db_config() -> String {
    "./tackboard.db".to_string()
}

const fn do_telemetry() -> bool {
    true
}

const fn default_session_expire_secs() -> i64 {
    60 * 60 * 24 * 30
}

fn default_local_socket() -> String {
    "/var/tmp/tackboard_local.socket".to_string()
}
