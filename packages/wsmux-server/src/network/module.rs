//! Network module with deferred startup lifecycle.
//!
//! Implements the deferred startup pattern: `new()` creates resources,
//! `start()` binds the TCP listener, and `serve()` starts accepting
//! connections. This separation lets the rest of the application wire
//! up the event handler and channel manager between `start()` and
//! `serve()`.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::app::{AppState, EventHandler};
use crate::channel::ChannelManager;
use crate::config::ServerConfig;
use crate::connection::ConnectionTable;
use crate::heartbeat;

use super::handlers::{health_handler, liveness_handler, readiness_handler, ws_upgrade_handler};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;

/// Manages the full HTTP/WebSocket server lifecycle.
///
/// Follows the deferred startup pattern:
/// 1. `new()` -- allocates shared state (connection table, channel
///    manager, shutdown controller)
/// 2. `start()` -- binds the TCP listener and proves it is actually
///    accepting connections
/// 3. `serve()` -- begins accepting connections until shutdown is
///    signalled
pub struct NetworkModule {
    config: ServerConfig,
    listener: Option<TcpListener>,
    connections: Arc<ConnectionTable>,
    channels: Arc<ChannelManager>,
    shutdown: Arc<ShutdownController>,
    on_event: EventHandler,
}

impl NetworkModule {
    /// Creates a new network module without binding any port.
    #[must_use]
    pub fn new(config: ServerConfig, on_event: EventHandler) -> Self {
        let channels = Arc::new(ChannelManager::new(config.channel));
        Self {
            config,
            listener: None,
            connections: Arc::new(ConnectionTable::new()),
            channels,
            shutdown: Arc::new(ShutdownController::new()),
            on_event,
        }
    }

    #[must_use]
    pub fn connections(&self) -> Arc<ConnectionTable> {
        Arc::clone(&self.connections)
    }

    #[must_use]
    pub fn channels(&self) -> Arc<ChannelManager> {
        Arc::clone(&self.channels)
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    fn app_state(&self) -> AppState {
        AppState {
            connections: Arc::clone(&self.connections),
            channels: Arc::clone(&self.channels),
            config: Arc::new(self.config.clone()),
            shutdown: Arc::clone(&self.shutdown),
            start_time: Instant::now(),
            on_event: Arc::clone(&self.on_event),
        }
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /health` -- detailed health JSON
    /// - `GET /health/live` -- Kubernetes liveness probe
    /// - `GET /health/ready` -- Kubernetes readiness probe
    /// - `GET /ws` -- WebSocket upgrade
    #[must_use]
    pub fn build_router(&self) -> Router {
        let layers = build_http_layers(&self.config);

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/ws", get(ws_upgrade_handler))
            .layer(layers)
            .with_state(self.app_state())
    }

    /// Binds the TCP listener to the configured host and port, then
    /// verifies it is actually accepting connections with a short
    /// self-connect retry loop before returning.
    ///
    /// The gap between a successful `bind()` and the OS actually
    /// accepting connections is real, if brief; a readiness signal
    /// reported before that gap closes can send a client's first dial
    /// into a connection refused error (spec.md §4.7's startup
    /// invariant).
    ///
    /// # Errors
    /// Returns an error if the address cannot be bound, or if the
    /// self-connect probe never succeeds.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        info!(host = %self.config.host, port, "tcp listener bound");

        self.listener = Some(listener);
        self.wait_until_accepting(port).await?;
        Ok(port)
    }

    async fn wait_until_accepting(&self, port: u16) -> anyhow::Result<()> {
        let probe_host = if self.config.host == "0.0.0.0" {
            "127.0.0.1"
        } else {
            &self.config.host
        };
        let addr = format!("{probe_host}:{port}");

        for attempt in 0..20u32 {
            if tokio::net::TcpStream::connect(&addr).await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(5 * u64::from(attempt + 1))).await;
        }
        Err(anyhow::anyhow!(
            "listener at {addr} never began accepting connections"
        ))
    }

    /// Starts serving connections until the shutdown signal fires.
    ///
    /// Consumes `self` because the listener is moved into the server.
    ///
    /// # Errors
    /// Returns an error if the server encounters a fatal I/O error.
    ///
    /// # Panics
    /// Panics if `start()` was not called before `serve()`.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .expect("start() must be called before serve()");
        let connections = Arc::clone(&self.connections);
        let shutdown_ctrl = Arc::clone(&self.shutdown);
        let config = self.config.clone();
        let router = self.build_router();

        let heartbeat_handle = heartbeat::spawn(
            Arc::clone(&connections),
            Arc::new(config.formats.clone()),
            config.heartbeat,
        );

        shutdown_ctrl.set_ready();

        let result = if let Some(ref tls_config) = config.tls {
            serve_tls(listener, router, tls_config, Arc::clone(&connections), shutdown_ctrl, shutdown).await
        } else {
            serve_plain(listener, router, connections, shutdown_ctrl, shutdown).await
        };

        heartbeat_handle.abort();
        result
    }
}

async fn serve_plain(
    listener: TcpListener,
    router: Router,
    connections: Arc<ConnectionTable>,
    shutdown_ctrl: Arc<ShutdownController>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("serving plain HTTP/WS connections");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    drain_connections(connections, shutdown_ctrl).await;
    Ok(())
}

async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls_config: &crate::config::TlsConfig,
    connections: Arc<ConnectionTable>,
    shutdown_ctrl: Arc<ShutdownController>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls_config.cert_path, &tls_config.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        shutdown.await;
        shutdown_handle.graceful_shutdown(None);
    });

    info!(%addr, "serving TLS connections");

    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;

    drain_connections(connections, shutdown_ctrl).await;
    Ok(())
}

/// Sends a `Close` frame to every connection, then waits for in-flight
/// requests to finish (up to 30 seconds).
async fn drain_connections(connections: Arc<ConnectionTable>, shutdown_ctrl: Arc<ShutdownController>) {
    shutdown_ctrl.trigger_shutdown();

    let entries = connections.drain_all();
    let count = entries.len();
    if count > 0 {
        info!(count, "draining connections");
        for entry in &entries {
            let _ = entry.send_queue.stop();
        }
    }

    let drained = shutdown_ctrl.wait_for_drain(Duration::from_secs(30)).await;
    if drained {
        info!("all connections drained successfully");
    } else {
        warn!("drain timeout expired with in-flight requests remaining");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler() -> EventHandler {
        Arc::new(|_conn, _event, _reply| {})
    }

    #[test]
    fn new_creates_module_without_binding() {
        let module = NetworkModule::new(ServerConfig::default(), noop_handler());
        assert!(module.listener.is_none());
    }

    #[test]
    fn connections_returns_shared_arc() {
        let module = NetworkModule::new(ServerConfig::default(), noop_handler());
        let a = module.connections();
        let b = module.connections();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn shutdown_controller_returns_shared_arc() {
        let module = NetworkModule::new(ServerConfig::default(), noop_handler());
        let a = module.shutdown_controller();
        let b = module.shutdown_controller();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn build_router_creates_router() {
        let module = NetworkModule::new(ServerConfig::default(), noop_handler());
        let _router = module.build_router();
    }

    #[tokio::test]
    async fn start_binds_and_verifies_acceptance() {
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        let mut module = NetworkModule::new(config, noop_handler());
        let port = module.start().await.expect("start should succeed");
        assert!(port > 0);
        assert!(module.listener.is_some());
    }

    #[tokio::test]
    #[should_panic(expected = "start() must be called before serve()")]
    async fn serve_panics_without_start() {
        let module = NetworkModule::new(ServerConfig::default(), noop_handler());
        let _ = module.serve(std::future::pending::<()>()).await;
    }
}
