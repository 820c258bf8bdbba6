//! End-to-end lifecycle tests: construct, start, exercise both transports,
//! shut down.

mod common;

use secrecy::SecretString;
use tackboard::Server;

#[tokio::test]
async fn serves_rest_and_keeps_admin_routes_off_the_public_transport() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = Server::new(common::test_config(&dir), None).await.unwrap();
    server.start().await.unwrap();
    let addr = server.public_addr().expect("public listener bound");

    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let response = client
        .get(format!("{base}/api/v1/ping"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    // workspace requires authentication
    let response = client
        .get(format!("{base}/api/v1/workspace"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    // admin routes must not resolve on the public transport
    let response = client
        .post(format!("{base}/api/v1/admin/users/alice/password"))
        .json(&serde_json::json!({"password": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    server.shutdown().await.unwrap();

    // the listener is gone after shutdown
    assert!(client.get(format!("{base}/api/v1/ping")).send().await.is_err());
}

#[tokio::test]
async fn bypass_token_grants_rest_and_websocket_access() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = Server::new(
        common::test_config(&dir),
        Some(SecretString::from("integration-token")),
    )
    .await
    .unwrap();
    server.start().await.unwrap();
    let addr = server.public_addr().expect("public listener bound");

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/api/v1/workspace"))
        .bearer_auth("integration-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    // websocket upgrade succeeds with the token, fails without
    let ws_url = format!("ws://{addr}/ws/onchange?token=integration-token");
    let (socket, response) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("websocket upgrade should succeed");
    assert_eq!(response.status().as_u16(), 101);
    drop(socket);

    let unauthorized = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/onchange"))
        .await;
    assert!(unauthorized.is_err(), "upgrade without token must be rejected");

    server.shutdown().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn local_mode_serves_admin_routes_on_the_socket_only() {
    use std::os::unix::fs::PermissionsExt as _;

    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("admin.socket");
    let mut config = common::test_config(&dir);
    config.enable_local_mode = true;
    config.local_mode_socket_location = socket_path.to_str().unwrap().to_string();

    let mut server = Server::new(config, None).await.unwrap();
    server.start().await.unwrap();
    let addr = server.public_addr().expect("public listener bound");

    let mode = std::fs::metadata(&socket_path)
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600, "socket must be owner-only");

    // the admin route resolves on the local transport (wrong method -> 405)
    let response = common::raw_unix_request(
        &socket_path,
        "GET",
        "/api/v1/admin/users/alice/password",
    )
    .await;
    assert!(
        response.starts_with("HTTP/1.1 405"),
        "admin route should exist on the local transport, got: {response}"
    );

    // public routes do not resolve on the local transport
    let response = common::raw_unix_request(&socket_path, "GET", "/api/v1/ping").await;
    assert!(
        response.starts_with("HTTP/1.1 404"),
        "public route must be absent from the local transport, got: {response}"
    );

    // and the admin route does not resolve on the public transport
    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/api/v1/admin/users/alice/password"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    server.shutdown().await.unwrap();
    assert!(!socket_path.exists(), "socket file removed on shutdown");
}

#[tokio::test]
async fn telemetry_id_survives_a_restart() {
    use tackboard::store::{SqlStore, Store as _, TELEMETRY_ID_SETTING};

    let dir = tempfile::tempdir().unwrap();
    let config = common::test_config(&dir);

    async fn stored_id(config: &tackboard::config::Configuration) -> String {
        let store = SqlStore::open("sqlite3", &config.db_config_string, "")
            .await
            .unwrap();
        let settings = store.get_system_settings().await.unwrap();
        let id = settings
            .get(TELEMETRY_ID_SETTING)
            .cloned()
            .expect("telemetry id persisted");
        store.shutdown().await.unwrap();
        id
    }

    let mut server = Server::new(config.clone(), None).await.unwrap();
    server.shutdown().await.unwrap();
    let first_id = stored_id(&config).await;
    assert!(!first_id.is_empty());

    // a second construction over the same database keeps the identity
    let mut server = Server::new(config.clone(), None).await.unwrap();
    server.shutdown().await.unwrap();
    assert_eq!(stored_id(&config).await, first_id);
}
