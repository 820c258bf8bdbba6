//! Shared helpers for integration tests.

use tackboard::config::Configuration;

/// Config bound to an ephemeral loopback port, with all state under `dir`.
pub fn test_config(dir: &tempfile::TempDir) -> Configuration {
    Configuration {
        port: 0,
        local_only: true,
        telemetry: false,
        db_config_string: dir
            .path()
            .join("tackboard.db")
            .to_str()
            .expect("utf8 path")
            .to_string(),
        files_path: dir
            .path()
            .join("files")
            .to_str()
            .expect("utf8 path")
            .to_string(),
        ..Configuration::default()
    }
}

/// Sends one raw HTTP/1.1 request over a unix socket and returns the
/// response text.
#[cfg(unix)]
pub async fn raw_unix_request(socket: &std::path::Path, method: &str, target: &str) -> String {
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    let mut stream = tokio::net::UnixStream::connect(socket)
        .await
        .expect("socket connect");
    let request =
        format!("{method} {target} HTTP/1.1\r\nHost: local\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.expect("write");
    let mut response = String::new();
    stream.read_to_string(&mut response).await.expect("read");
    response
}
