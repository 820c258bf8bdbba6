//! Local admin transport: a unix-socket HTTP server for privileged routes.
//!
//! Only processes on the same machine that can open the owner-only socket
//! file can reach these routes; nothing registered here is ever served on
//! the public transport.

use core::time::Duration;
use std::{
    fs,
    io,
    os::unix::fs::PermissionsExt as _,
    path::{Path, PathBuf},
};

use axum::Router;
use tokio::{net::UnixListener, sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

/// A running local admin server. Obtained from [`LocalModeServer::start`],
/// torn down with [`LocalModeServer::stop`].
pub struct LocalModeServer {
    socket_path: PathBuf,
    shutdown_tx: watch::Sender<bool>,
    serve_task: JoinHandle<io::Result<()>>,
}

impl LocalModeServer {
    /// Binds the unix socket and serves `router` on a background task.
    ///
    /// A stale socket file from an unclean shutdown is removed before
    /// binding; permissions are restricted to the owner immediately after,
    /// closing the window in which other local users could connect.
    ///
    /// # Errors
    ///
    /// Fails when the socket cannot be bound or its permissions cannot be
    /// restricted.
    pub fn start(router: Router, socket_path: &Path) -> io::Result<Self> {
        match fs::remove_file(socket_path) {
            Ok(()) => debug!(socket = %socket_path.display(), "Removed stale socket file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let listener = UnixListener::bind(socket_path)?;
        fs::set_permissions(socket_path, fs::Permissions::from_mode(0o600))?;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let serve_task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await
        });

        info!(socket = %socket_path.display(), "Local admin transport listening");
        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            shutdown_tx,
            serve_task,
        })
    }

    /// Stops the server and removes the socket file, ignoring cleanup
    /// errors.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        match tokio::time::timeout(Duration::from_secs(5), self.serve_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!("Local admin transport exited with error: {e}"),
            Ok(Err(e)) => warn!("Local admin transport task panicked: {e}"),
            Err(_) => warn!("Local admin transport did not stop in time"),
        }
        if let Err(e) = fs::remove_file(&self.socket_path) {
            debug!("Failed to remove socket file: {e}");
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}
