//! Configuration loading utilities.
//!
//! Reads and parses the server configuration from a TOML file.

use std::path::Path;

use eyre::WrapErr as _;
use tokio::fs;

use crate::config::Configuration;

/// Reads and parses the server config from a TOML file.
///
/// # Errors
///
/// Returns an error if the config file cannot be read or parsed.
pub async fn load<P: AsRef<Path>>(path: P) -> eyre::Result<Configuration> {
    let path_ref = path.as_ref();
    let content = fs::read_to_string(&path).await.wrap_err(format!(
        "Failed to read config file at: {}",
        path_ref.display()
    ))?;
    let config: Configuration = toml::from_str(&content).wrap_err(format!(
        "Failed to parse config as TOML at: {}",
        path_ref.display()
    ))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::{env, fs};

    use secrecy::ExposeSecret as _;

    use super::*;
    use crate::config::{AuthMode, DEFAULT_PORT, DEFAULT_SERVER_ROOT};

    #[tokio::test]
    async fn load_config_file() {
        let toml_str = r#"
            port = 9090
            db_config_string = "/var/lib/tackboard/tackboard.db"
            db_table_prefix = "tb_"
            session_expire_time_secs = 3600
        "#;
        let tmp = env::temp_dir().join("tackboard_test_config.toml");
        fs::write(&tmp, toml_str).unwrap();
        let cfg = load(&tmp).await.unwrap();
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.db_config_string, "/var/lib/tackboard/tackboard.db");
        assert_eq!(cfg.db_table_prefix, "tb_");
        assert_eq!(cfg.session_expire_time_secs, 3600);
        // untouched fields keep their defaults
        assert_eq!(cfg.server_root, DEFAULT_SERVER_ROOT);
        assert_eq!(cfg.db_type, "sqlite3");
        assert!(cfg.telemetry);
    }

    #[tokio::test]
    async fn load_config_missing_file() {
        let tmp = env::temp_dir().join("tackboard_does_not_exist.toml");
        let res = load(&tmp).await;
        assert!(res.is_err(), "Expected error for missing file");
    }

    #[tokio::test]
    async fn load_config_invalid_toml() {
        let tmp = env::temp_dir().join("tackboard_invalid.toml");
        fs::write(&tmp, "not valid toml").unwrap();
        let res = load(&tmp).await;
        assert!(res.is_err(), "Expected error for invalid TOML");
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: Configuration = toml::from_str("").expect("empty config should parse");
        assert_eq!(cfg, Configuration::default());
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert!(!cfg.enable_local_mode);
    }

    #[test]
    fn tls_empty_table_uses_defaults() {
        let toml_str = r"
            [tls]
        ";
        let cfg: Configuration = toml::from_str(toml_str).expect("Failed to parse TOML");
        let tls = cfg.tls.expect("tls should be present when table exists");
        assert_eq!(tls.cert_path, "./tls_cert.pem");
        assert_eq!(tls.key_path, "./tls_key.pem");
        assert!(tls.enable, "enable should default to true");
    }

    #[test]
    fn oidc_table_deserializes() {
        let toml_str = r#"
            auth_mode = "oidc"

            [oidc]
            provider_url = "https://sso.example.com/realms/main"
            client_secret = "shhh"
        "#;
        let cfg: Configuration = toml::from_str(toml_str).expect("Failed to parse TOML");
        assert_eq!(cfg.auth_mode, AuthMode::Oidc);
        let oidc = cfg.oidc.expect("oidc table should be present");
        assert_eq!(oidc.provider_url, "https://sso.example.com/realms/main");
        assert_eq!(oidc.client_id, "tackboard");
        assert_eq!(oidc.client_secret.expose_secret(), "shhh");
    }
}
