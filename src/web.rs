//! Public HTTP transport hosting the REST routes and the WebSocket upgrade
//! path.
//!
//! Routes are contributed by [`RouteProvider`] implementations before the
//! listener starts; `start` binds the socket and spawns the accept loop,
//! `shutdown` drains in-flight requests and surfaces serve errors.

use core::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};
use std::{io, sync::Mutex};

use axum::{
    Router,
    http::{
        StatusCode,
        header::{AUTHORIZATION, COOKIE},
    },
};
use axum_server::{Handle, tls_rustls::RustlsConfig};
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::{
    ServiceBuilderExt as _, request_id::MakeRequestUuid, services::ServeDir,
    timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::{info, warn};

use crate::config::{Configuration, TlsConfig};

/// A component contributing routes to a transport.
pub trait RouteProvider {
    fn routes(&self) -> Router;
}

/// The externally reachable HTTP server.
pub struct WebServer {
    port: u16,
    local_only: bool,
    tls: Option<TlsConfig>,
    web_path: String,
    router: Mutex<Option<Router>>,
    handle: Handle<SocketAddr>,
    serve_task: Mutex<Option<JoinHandle<io::Result<()>>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl WebServer {
    pub fn new(config: &Configuration) -> Self {
        Self {
            port: config.port,
            local_only: config.local_only,
            tls: config.tls.clone(),
            web_path: config.web_path.clone(),
            router: Mutex::new(Some(Router::new())),
            handle: Handle::new(),
            serve_task: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Merges a provider's routes into the transport. Has no effect once the
    /// listener is running.
    pub fn add_routes(&self, provider: &dyn RouteProvider) {
        let mut router = self.router.lock().unwrap_or_else(|e| e.into_inner());
        match router.take() {
            Some(r) => *router = Some(r.merge(provider.routes())),
            None => warn!("Routes added after the public transport started are ignored"),
        }
    }

    /// Binds the listener and spawns the accept loop.
    ///
    /// # Errors
    ///
    /// Fails when the socket cannot be bound or the TLS material cannot be
    /// loaded. A second call is a no-op.
    pub async fn start(&self) -> io::Result<()> {
        let Some(router) = self
            .router
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            warn!("Public transport already started");
            return Ok(());
        };

        let middleware_stack = ServiceBuilder::new()
            .sensitive_headers([AUTHORIZATION, COOKIE])
            .set_x_request_id(MakeRequestUuid)
            .propagate_x_request_id()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(30),
            ));

        // anything the API routes don't claim is served from the web app dir
        let app = router
            .fallback_service(ServeDir::new(&self.web_path))
            .layer(middleware_stack);

        let ip: IpAddr = if self.local_only {
            Ipv4Addr::LOCALHOST.into()
        } else {
            Ipv4Addr::UNSPECIFIED.into()
        };
        let listener = std::net::TcpListener::bind(SocketAddr::from((ip, self.port)))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = Some(addr);

        let task = match self.tls {
            Some(ref tls_cfg @ TlsConfig { enable: true, .. }) => {
                let rustls_cfg =
                    RustlsConfig::from_pem_file(&tls_cfg.cert_path, &tls_cfg.key_path).await?;
                info!("Listening on https://{addr}");
                let server = axum_server::from_tcp_rustls(listener, rustls_cfg)?
                    .handle(self.handle.clone());
                tokio::spawn(async move { server.serve(app.into_make_service()).await })
            }
            _ => {
                info!("Listening on http://{addr}");
                let server = axum_server::from_tcp(listener)?.handle(self.handle.clone());
                tokio::spawn(async move { server.serve(app.into_make_service()).await })
            }
        };
        *self.serve_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);

        Ok(())
    }

    /// Address the listener is bound to, once started. Useful when the
    /// configured port is 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Gracefully drains in-flight requests and stops the accept loop.
    ///
    /// # Errors
    ///
    /// Surfaces the serve task's error, if any. A call without a prior
    /// `start` is a no-op.
    pub async fn shutdown(&self) -> io::Result<()> {
        let task = self
            .serve_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(task) = task else {
            return Ok(());
        };
        self.handle
            .graceful_shutdown(Some(Duration::from_secs(30)));
        task.await.map_err(io::Error::other)?
    }
}
