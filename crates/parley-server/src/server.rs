//! `ChatServer`: Axum HTTP + WebSocket server.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::hub::session::serve_connection;
use crate::hub::{BroadcastDispatcher, ConnectionRegistry, DispatchSummary, Hub};
use crate::shutdown::ShutdownCoordinator;

/// Body of `GET /ping`.
pub const PING_RESPONSE: &str = "Welcome to parley";

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Registry, inbox and hub configuration.
    pub hub: Hub,
    /// Cancelled when the server starts shutting down.
    pub shutdown: CancellationToken,
    /// Tracks live WebSocket sessions.
    pub sessions: TaskTracker,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Maximum inbound WebSocket message size.
    pub max_message_size: usize,
}

/// The chat server.
///
/// Owns the hub and the dispatcher task. Shutdown runs in a fixed order:
/// the dispatcher stops and handles its queue first, then every session is
/// cancelled and every connection closed.
pub struct ChatServer {
    config: ServerConfig,
    hub: Hub,
    dispatcher: Mutex<Option<BroadcastDispatcher>>,
    dispatcher_task: Mutex<Option<JoinHandle<DispatchSummary>>>,
    dispatcher_token: CancellationToken,
    shutdown: Arc<ShutdownCoordinator>,
    sessions: TaskTracker,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl ChatServer {
    /// Create a new server. Nothing runs until [`ChatServer::listen`].
    pub fn new(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Self {
        let (hub, dispatcher) = Hub::new(config.hub.clone());
        Self {
            config,
            hub,
            dispatcher: Mutex::new(Some(dispatcher)),
            dispatcher_task: Mutex::new(None),
            dispatcher_token: CancellationToken::new(),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            sessions: TaskTracker::new(),
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            shutdown: self.shutdown.token(),
            sessions: self.sessions.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            max_message_size: self.config.max_message_size,
        };

        let router = Router::new()
            .route("/ws", get(ws_handler))
            .route("/ping", get(ping_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state);

        let router = match &self.config.static_dir {
            Some(dir) => router
                .nest_service("/static", ServeDir::new(dir))
                .route_service("/", ServeFile::new(dir.join("index.html"))),
            None => router,
        };

        router
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address, start the dispatcher and serve.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    /// Fails if the address cannot be bound or the server is already
    /// listening.
    pub async fn listen(self: &Arc<Self>) -> io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        let dispatcher = self
            .dispatcher
            .lock()
            .take()
            .ok_or_else(|| io::Error::other("server is already listening"))?;
        let task = tokio::spawn(dispatcher.run(self.dispatcher_token.clone()));
        *self.dispatcher_task.lock() = Some(task);

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await;
            if let Err(e) = served {
                warn!(error = %e, "http server stopped with error");
            }
        });

        info!(
            addr = %local_addr,
            max_connections = self.config.hub.max_connections,
            echo_to_sender = self.config.hub.echo_to_sender,
            "parley server listening"
        );
        Ok((local_addr, handle))
    }

    /// Shut the server down and wait up to `timeout` for each stage.
    ///
    /// 1. Stop the dispatcher (drain or discard its queue)
    /// 2. Cancel every session and close every connection
    /// 3. Wait for sessions and `handles` to finish
    pub async fn shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Duration) -> DispatchSummary {
        info!("shutting down");
        self.dispatcher_token.cancel();
        let task = self.dispatcher_task.lock().take();
        let summary = match task {
            Some(task) => {
                let abort = task.abort_handle();
                match tokio::time::timeout(timeout, task).await {
                    Ok(Ok(summary)) => summary,
                    Ok(Err(e)) => {
                        warn!(error = %e, "dispatcher task failed");
                        DispatchSummary::default()
                    }
                    Err(_) => {
                        warn!("dispatcher did not stop in time, aborting");
                        abort.abort();
                        DispatchSummary::default()
                    }
                }
            }
            None => DispatchSummary::default(),
        };

        self.shutdown.shutdown();
        let closed = self.hub.registry.close_all();
        self.sessions.close();
        let sessions = self.sessions.clone();
        let mut handles = handles;
        handles.push(tokio::spawn(async move { sessions.wait().await }));
        let finished = self.shutdown.graceful_shutdown(handles, Some(timeout)).await;

        info!(
            closed_connections = closed,
            drained = summary.drained,
            discarded = summary.discarded,
            clean = finished,
            "shutdown complete"
        );
        summary
    }

    /// The hub shared by every session.
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.hub.registry
    }

    /// Get the shutdown coordinator.
    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_cancelled() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let AppState {
        hub,
        shutdown,
        sessions,
        max_message_size,
        ..
    } = state;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| {
            let session = sessions.track_future(serve_connection(socket, hub, shutdown));
            async move {
                let _ = session.await;
            }
        })
        .into_response()
}

/// GET /ping
async fn ping_handler() -> &'static str {
    PING_RESPONSE
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let resp = health::health_check(
        state.start_time,
        state.hub.registry.len(),
        state.hub.stats(),
    );
    Json(resp)
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
