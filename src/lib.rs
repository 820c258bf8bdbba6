//! Tackboard server library.
//!
//! Composes persistence, authentication, the WebSocket transport, file
//! storage, background scheduling, and usage telemetry behind the
//! [`server::Server`] lifecycle, and exposes [`inner_main`] so the shim
//! binary stays trivial.

extern crate alloc;
extern crate core;

pub mod api;
pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod extauth;
pub mod files;
#[cfg(unix)]
pub mod local;
pub mod logging;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod web;
pub mod webhook;
pub mod ws;

pub use server::{Server, ServerError};

use std::fs;

use eyre::{Result, WrapErr as _};
#[cfg(unix)]
use nix::sys::stat;
use secrecy::SecretString;
use tokio::signal;
use tracing::info;

use cli::{Cli, Command};

/// Creates a future that resolves when a shutdown signal is received.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to create SIGTERM signal handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = signal::ctrl_c() => {}
        }
    }
    #[cfg(not(unix))]
    {
        drop(signal::ctrl_c().await);
    }
}

/// The server's main function; can be called from a shim binary.
///
/// Parses nothing itself: the caller hands in the parsed CLI.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or if the server
/// fails to construct, start, or shut down.
pub async fn inner_main(invocation: Cli) -> Result<()> {
    match invocation.command {
        Command::Serve(args) => {
            // Restrictive umask so database and socket files are owner-only
            #[cfg(unix)]
            stat::umask(stat::Mode::S_IRWXU.complement());

            logging::init(args.log_format)?;

            let config_path = fs::canonicalize(&args.config)
                .wrap_err(format!("Config file not found at: {}", args.config))?;
            let mut config = config::load(&config_path).await?;
            if let Some(port) = args.port {
                config.port = port;
            }

            let single_user_token = args.single_user_token.map(SecretString::from);

            info!("Starting server");
            let mut server = Server::new(config, single_user_token).await?;
            server.start().await?;

            shutdown_signal().await;
            info!("Received shutdown, shutting down");
            server.shutdown().await?;
            Ok(())
        }
    }
}
