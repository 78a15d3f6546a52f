//! `ChatServer`: axum listener feeding WebSocket connections into a room.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use interchat_core::FailureReporter;
use interchat_room::{Room, Session, SessionOptions};
use interchat_telemetry::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::ws;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The room every connection joins.
    pub room: Room,
    /// Receives unexpected closures.
    pub reporter: Arc<dyn FailureReporter>,
    /// Options for accepted sessions.
    pub session: SessionOptions,
    /// Upgrade-layer message size limit.
    pub max_message_size: usize,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub metrics: Option<PrometheusHandle>,
}

/// The chat listener.
pub struct ChatServer {
    config: ServerConfig,
    room: Room,
    reporter: Arc<dyn FailureReporter>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl ChatServer {
    /// Create a server in front of `room`.
    pub fn new(
        config: ServerConfig,
        room: Room,
        reporter: Arc<dyn FailureReporter>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            config,
            room,
            reporter,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
        }
    }

    /// Build the router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            room: self.room.clone(),
            reporter: Arc::clone(&self.reporter),
            session: self.config.session,
            max_message_size: self.config.max_message_size,
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/room", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until shutdown is signalled.
    ///
    /// Returns the bound address and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(&self.config.address).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%addr, room = self.room.name(), "chat server listening");

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                warn!(error = %e, "server stopped with error");
            }
        });
        Ok((addr, handle))
    }

    /// The room connections join.
    pub fn room(&self) -> &Room {
        &self.room
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Listener configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /room
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Run one connection: start the outbound loop, join, run the inbound loop
/// on this task, then leave.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (session, handle) = Session::new(state.session);
    let session_id = session.id().clone();
    let span = info_span!("session", session_id = %session_id, room = state.room.name());

    let sessions = Arc::clone(&state.shutdown);
    let session_task = async move {
        let connected_at = Instant::now();
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        info!("client connected");

        let lifecycle = session.lifecycle();
        let shutdown = state.shutdown.token();
        let _shutdown_watch = tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => lifecycle.cancel(),
                () = lifecycle.cancelled() => {}
            }
        });

        let (sink, mut stream) = ws::split(socket);
        let (inbound, outbound) = session.into_loops();
        let writer = tokio::spawn(outbound.run(sink).in_current_span());

        match state.room.join(handle).await {
            Ok(()) => {
                let exit = inbound
                    .run(&mut stream, &state.room, state.reporter.as_ref())
                    .await;
                debug!(?exit, "inbound loop finished");
                state.room.leave(session_id).await;
            }
            Err(e) => {
                warn!(error = %e, kind = e.error_kind(), "join refused, closing connection");
            }
        }

        match writer.await {
            Ok(exit) => debug!(?exit, "outbound loop finished"),
            Err(e) => warn!(error = %e, "outbound task failed"),
        }

        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(connected_at.elapsed().as_secs_f64());
        info!("client disconnected");
    }
    .instrument(span);
    sessions.track_session(session_task).await;
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let members = state.room.member_count().await.ok();
    let resp = health::health_check(state.start_time, members);
    let status = if resp.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(resp))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use interchat_core::CollectingReporter;
    use interchat_log::{DurableLog, LogOptions, MemoryLogStore};
    use interchat_room::{RoomCoordinator, RoomOptions};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn make_server(metrics: Option<PrometheusHandle>) -> ChatServer {
        let log = DurableLog::new("public", Arc::new(MemoryLogStore::new()), LogOptions::default());
        let reporter = Arc::new(CollectingReporter::new());
        let (room, _task) = RoomCoordinator::spawn(log, RoomOptions::default(), reporter.clone());
        ChatServer::new(ServerConfig::default(), room, reporter, metrics)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, axum::body::Bytes) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        (status, body)
    }

    #[tokio::test]
    async fn health_reports_members() {
        let server = make_server(None);
        let (status, body) = get(server.router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["members"], 0);
    }

    #[tokio::test]
    async fn metrics_route_renders_when_recorder_present() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = make_server(Some(handle));
        let (status, _) = get(server.router(), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_route_absent_without_recorder() {
        let server = make_server(None);
        let (status, _) = get(server.router(), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn room_route_requires_upgrade() {
        let server = make_server(None);
        let (status, _) = get(server.router(), "/room").await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server(None);
        let (status, _) = get(server.router(), "/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops_on_shutdown() {
        let server = make_server(None);
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.shutdown().shutdown();
        handle.await.unwrap();
    }
}
