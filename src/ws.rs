//! WebSocket sub-server for pushing board changes to connected clients.
//!
//! One event loop per client, fed from a broadcast channel. Clients
//! authenticate at upgrade time, either with the single-user bypass token or
//! with a regular session token.

use alloc::sync::Arc;
use std::collections::HashMap;

use axum::{
    Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse as _, Response},
    routing::any,
};
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{auth::Auth, web::RouteProvider};

/// Messages pushed to connected clients.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum WsMessage {
    /// Blocks inside a workspace changed.
    Change {
        workspace_id: String,
        block_ids: Vec<String>,
    },
}

/// WebSocket sub-server, registered on the public transport.
#[derive(Clone)]
pub struct WsServer {
    auth: Arc<Auth>,
    single_user_token: Option<Arc<SecretString>>,
    tx: broadcast::Sender<WsMessage>,
}

impl WsServer {
    pub fn new(auth: Arc<Auth>, single_user_token: Option<Arc<SecretString>>) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            auth,
            single_user_token,
            tx,
        }
    }

    /// Pushes a change notification to every connected client.
    pub fn broadcast_change(&self, workspace_id: &str, block_ids: Vec<String>) {
        let msg = WsMessage::Change {
            workspace_id: workspace_id.to_string(),
            block_ids,
        };
        if self.tx.send(msg).is_err() {
            debug!("No websocket subscribers");
        }
    }

    /// When the bypass token is configured it is the only accepted
    /// credential; otherwise tokens resolve through the session store.
    async fn authorized(&self, token: &str) -> bool {
        if let Some(ref expected) = self.single_user_token {
            return !token.is_empty() && token == expected.expose_secret();
        }
        match self.auth.get_session(token).await {
            Ok(session) => session.is_some(),
            Err(e) => {
                warn!("Session lookup failed during websocket upgrade: {e}");
                false
            }
        }
    }
}

impl RouteProvider for WsServer {
    fn routes(&self) -> Router {
        Router::new()
            .route("/ws/onchange", any(ws_handler))
            .with_state(self.clone())
    }
}

/// Gets called for every new client and spins up an event loop.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(server): State<WsServer>,
) -> Response {
    let token = params.get("token").map(String::as_str).unwrap_or_default();
    if !server.authorized(token).await {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let rx = server.tx.subscribe();
    ws.on_upgrade(move |socket| client_loop(socket, rx))
        .into_response()
}

async fn send_ws_message(socket: &mut WebSocket, msg: &WsMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!("Failed to serialize websocket message: {e}");
            Err(axum::Error::new(e))
        }
    }
}

/// One event loop per client.
async fn client_loop(mut socket: WebSocket, mut rx: broadcast::Receiver<WsMessage>) {
    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Ok(msg) => {
                        if let Err(e) = send_ws_message(&mut socket, &msg).await {
                            debug!("Failed to send message, closing connection: {e}");
                            break;
                        }
                    }
                    Err(_) => {
                        warn!("Broadcast channel closed, stopping websocket handler");
                        break;
                    }
                }
            }
            received = socket.recv() => {
                if received.is_none() {
                    info!("Websocket connection closed");
                    break;
                }
            }
        }
    }
}
