//! `ApexServer`: Axum HTTP + WebSocket surface.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Bytes;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::bus::MessageBus;
use crate::config::ServerConfig;
use crate::errors::{Result, ServerError};
use crate::health::{self, HealthInputs, HealthResponse};
use crate::ingest::{IngestStats, PersistStats};
use crate::metrics::WS_HANDSHAKE_FAILURES_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::{ConnectionManager, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session owner and fan-out.
    pub manager: Arc<ConnectionManager>,
    /// Bus that `POST /ingest` publishes onto.
    pub bus: MessageBus,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Prometheus renderer.
    pub metrics: PrometheusHandle,
    /// Ingestion counters.
    pub ingest: Arc<IngestStats>,
    /// Persistence counters.
    pub persist: Arc<PersistStats>,
    /// Max inbound WebSocket message size.
    pub max_message_size: usize,
    /// When the server started.
    pub start_time: Instant,
}

/// The Apex gateway server.
pub struct ApexServer {
    config: ServerConfig,
    manager: Arc<ConnectionManager>,
    bus: MessageBus,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: PrometheusHandle,
    ingest: Arc<IngestStats>,
    persist: Arc<PersistStats>,
    start_time: Instant,
}

impl ApexServer {
    /// Create a server around an existing manager and bus.
    pub fn new(
        config: ServerConfig,
        manager: Arc<ConnectionManager>,
        bus: MessageBus,
        metrics: PrometheusHandle,
    ) -> Self {
        Self {
            config,
            manager,
            bus,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics,
            ingest: Arc::new(IngestStats::default()),
            persist: Arc::new(PersistStats::default()),
            start_time: Instant::now(),
        }
    }

    /// Report these counters on `/health`.
    #[must_use]
    pub fn with_stats(mut self, ingest: Arc<IngestStats>, persist: Arc<PersistStats>) -> Self {
        self.ingest = ingest;
        self.persist = persist;
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            manager: Arc::clone(&self.manager),
            bus: self.bus.clone(),
            shutdown: Arc::clone(&self.shutdown),
            metrics: self.metrics.clone(),
            ingest: Arc::clone(&self.ingest),
            persist: Arc::clone(&self.persist),
            max_message_size: self.config.max_message_size,
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .route("/ingest/{*channel}", post(ingest_handler))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and serve in the background until shutdown is requested.
    ///
    /// Returns the bound address (useful with port 0) and the server task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "http server failed");
            }
            info!("http server stopped");
        });
        info!(addr = %local, "apex server listening");
        Ok((local, handle))
    }

    /// Connection manager.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Message bus.
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

fn shutting_down(state: &AppState) -> bool {
    state.shutdown.is_shutting_down() || !state.manager.is_accepting()
}

fn unavailable(reason: &str) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": reason })),
    )
        .into_response()
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(HealthInputs {
        start_time: state.start_time,
        shutting_down: shutting_down(&state),
        connections: state.manager.session_count(),
        topics: state.manager.active_topic_count(),
        ingest: state.ingest.snapshot(),
        persist: state.persist.snapshot(),
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}

async fn ws_handler(
    State(state): State<AppState>,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        counter!(WS_HANDSHAKE_FAILURES_TOTAL, "reason" => "shutting_down").increment(1);
        return unavailable("shutting_down");
    }
    if let Err(e) = state.manager.check_admission() {
        counter!(WS_HANDSHAKE_FAILURES_TOTAL, "reason" => e.reason()).increment(1);
        return unavailable(e.reason());
    }
    match ws {
        Ok(ws) => {
            let manager = Arc::clone(&state.manager);
            ws.max_message_size(state.max_message_size)
                .on_upgrade(move |socket| run_ws_session(socket, manager))
        }
        Err(rejection) => {
            debug!(error = %rejection, "websocket upgrade rejected");
            rejection.into_response()
        }
    }
}

async fn ingest_handler(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    body: Bytes,
) -> Response {
    if shutting_down(&state) {
        return unavailable("shutting_down");
    }
    let channel = channel.trim_matches('/').to_owned();
    if channel.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "empty channel" })),
        )
            .into_response();
    }
    let subscribers = state.bus.publish(&channel, body);
    debug!(channel = %channel, subscribers, "bus message published");
    (
        StatusCode::ACCEPTED,
        Json(json!({ "accepted": true, "channel": channel, "subscribers": subscribers })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventSource;
    use crate::metrics::detached_handle;
    use crate::websocket::ManagerConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_server() -> ApexServer {
        ApexServer::new(
            ServerConfig::default(),
            Arc::new(ConnectionManager::new(ManagerConfig::default())),
            MessageBus::new(16),
            detached_handle(),
        )
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_req(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[test]
    fn server_with_default_config() {
        let server = make_server();
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.config().port, 0);
        assert!(!server.shutdown().is_shutting_down());
        assert_eq!(server.manager().session_count(), 0);
        assert_eq!(server.bus().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let resp = make_server().router().oneshot(get_req("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = json_body(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["ingest"]["received"], 0);
        assert_eq!(parsed["persist"]["failed"], 0);
    }

    #[tokio::test]
    async fn health_reports_shared_stats() {
        let ingest = Arc::new(IngestStats::default());
        let server = make_server().with_stats(Arc::clone(&ingest), Arc::new(PersistStats::default()));
        let resp = server.router().oneshot(get_req("/health")).await.unwrap();
        assert_eq!(json_body(resp).await["ingest"]["broadcasts"], 0);
    }

    #[tokio::test]
    async fn health_reports_shutdown() {
        let server = make_server();
        server.shutdown().shutdown();
        let resp = server.router().oneshot(get_req("/health")).await.unwrap();
        assert_eq!(json_body(resp).await["status"], "shutting_down");
    }

    #[tokio::test]
    async fn metrics_endpoint_renders() {
        let resp = make_server().router().oneshot(get_req("/metrics")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_without_upgrade_headers_is_rejected() {
        let resp = make_server().router().oneshot(get_req("/ws")).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn ws_refused_while_shutting_down() {
        let server = make_server();
        server.shutdown().shutdown();
        let resp = server.router().oneshot(get_req("/ws")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(resp).await["error"], "shutting_down");
    }

    #[tokio::test]
    async fn ws_refused_at_capacity() {
        let server = ApexServer::new(
            ServerConfig::default(),
            Arc::new(ConnectionManager::new(ManagerConfig {
                max_connections: 0,
                ..ManagerConfig::default()
            })),
            MessageBus::new(16),
            detached_handle(),
        );
        let resp = server.router().oneshot(get_req("/ws")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(resp).await["error"], "at_capacity");
    }

    #[tokio::test]
    async fn ingest_publishes_to_bus() {
        let server = make_server();
        let mut sub = server.bus().subscribe(["sensors/#"]).unwrap();
        let resp = server
            .router()
            .oneshot(post_req("/ingest/sensors/line-a", r#"{"asset_id":1}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let parsed = json_body(resp).await;
        assert_eq!(parsed["channel"], "sensors/line-a");
        assert_eq!(parsed["subscribers"], 1);

        let msg = sub.next().await.unwrap();
        assert_eq!(msg.channel, "sensors/line-a");
        assert_eq!(&msg.payload[..], br#"{"asset_id":1}"#);
    }

    #[tokio::test]
    async fn ingest_refused_while_shutting_down() {
        let server = make_server();
        server.shutdown().shutdown();
        let resp = server
            .router()
            .oneshot(post_req("/ingest/alerts/a", "{}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let resp = make_server().router().oneshot(get_req("/nope")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.shutdown().shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
