use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use aria_core::bus::StatusBus;
use aria_core::config::{
    Config, RunMode, DEFAULT_LOCALE, DEFAULT_MODEL_PATH, DEFAULT_PORT, DEFAULT_PUBLIC_DIR,
};
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::client::{self, ClientRegistry, ConnectionId};
use crate::orchestrator::{self, Orchestrator, OrchestratorConfig, PipelineFactory};
use crate::routes;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub mode: RunMode,
    pub host: String,
    pub port: u16,
    pub locale: String,
    pub model_path: PathBuf,
    pub public_dir: PathBuf,
    pub max_send_queue: usize,
    pub session_queue_capacity: usize,
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Production,
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            locale: DEFAULT_LOCALE.into(),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            public_dir: PathBuf::from(DEFAULT_PUBLIC_DIR),
            max_send_queue: 256,
            session_queue_capacity: 64,
            handshake_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&Config> for ServerConfig {
    fn from(config: &Config) -> Self {
        Self {
            mode: config.mode,
            host: config.host.clone(),
            port: config.port,
            locale: config.locale.clone(),
            model_path: config.model_path.clone(),
            public_dir: config.public_dir.clone(),
            ..Default::default()
        }
    }
}

/// Server startup errors. A bind failure is recoverable: the caller
/// reports it and the process continues without serving.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind listener: {0}")]
    Listen(#[from] std::io::Error),
}

/// Static facts exposed by the informational plugin.
pub struct ServerInfo {
    pub mode: RunMode,
    pub locale: String,
    pub model_path: PathBuf,
    pub started_at: Instant,
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
    pub event_tx: mpsc::Sender<(ConnectionId, String)>,
    pub orchestrator: Arc<Orchestrator>,
    pub info: Arc<ServerInfo>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, public_dir: &Path, permissive_cors: bool) -> Router {
    let mut router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .merge(routes::plugin_routes())
        .fallback_service(ServeDir::new(public_dir))
        .with_state(state);

    if permissive_cors {
        router = router.layer(CorsLayer::permissive());
    }
    router.layer(TraceLayer::new_for_http())
}

/// Create and start the server. Returns a handle that keeps its
/// background tasks alive.
pub async fn start(
    config: ServerConfig,
    bus: StatusBus,
    factory: Arc<dyn PipelineFactory>,
) -> Result<ServerHandle, ServerError> {
    let registry = Arc::new(ClientRegistry::new(config.max_send_queue));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&registry),
        bus,
        factory,
        OrchestratorConfig {
            locale: config.locale.clone(),
            model_path: config.model_path.clone(),
            queue_capacity: config.session_queue_capacity,
            handshake_timeout: config.handshake_timeout,
        },
    ));

    // Single event loop: all inbound connection events funnel through
    // one channel, so per-connection ordering is preserved.
    let (event_tx, event_rx) = mpsc::channel::<(ConnectionId, String)>(1024);
    let events = tokio::spawn(process_events(Arc::clone(&orchestrator), event_rx));

    let sweep = orchestrator::start_handshake_sweep(
        Arc::clone(&orchestrator),
        config.handshake_timeout / 2,
    );
    let cleanup = client::start_cleanup_task(Arc::clone(&registry), Duration::from_secs(60));

    let info = Arc::new(ServerInfo {
        mode: config.mode,
        locale: config.locale.clone(),
        model_path: config.model_path.clone(),
        started_at: Instant::now(),
    });

    let state = AppState {
        registry: Arc::clone(&registry),
        event_tx,
        orchestrator: Arc::clone(&orchestrator),
        info,
    };

    let router = build_router(state, &config.public_dir, config.mode.is_dev());
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), mode = config.mode.as_str(), "server started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        registry,
        orchestrator,
        _server: server,
        _events: events,
        _sweep: sweep,
        _cleanup: cleanup,
    })
}

/// Handle returned by `start()`; keeps its background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    pub registry: Arc<ClientRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    _server: tokio::task::JoinHandle<()>,
    _events: tokio::task::JoinHandle<()>,
    _sweep: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a new WebSocket connection for its whole lifetime.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (connection_id, rx) = state.registry.register();
    state.orchestrator.connection_opened(connection_id.clone());

    client::handle_ws_connection(
        socket,
        connection_id.clone(),
        rx,
        Arc::clone(&state.registry),
        state.event_tx.clone(),
    )
    .await;

    state.orchestrator.connection_closed(&connection_id);
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "connections": state.registry.count(),
    }))
}

/// Drain inbound connection events into the orchestrator, one at a time.
async fn process_events(
    orchestrator: Arc<Orchestrator>,
    mut rx: mpsc::Receiver<(ConnectionId, String)>,
) {
    while let Some((connection_id, raw)) = rx.recv().await {
        orchestrator.handle_event(connection_id, &raw).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::IntentPipelineFactory;
    use std::io::Write;

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0, // random port
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let handle = start(test_config(), StatusBus::default(), Arc::new(IntentPipelineFactory))
            .await
            .unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn info_plugin_reports_runtime_facts() {
        let config = ServerConfig {
            locale: "fr-FR".into(),
            ..test_config()
        };
        let handle = start(config, StatusBus::default(), Arc::new(IntentPipelineFactory))
            .await
            .unwrap();

        let url = format!("http://127.0.0.1:{}/v4/info", handle.port);
        let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(body["name"], "aria");
        assert_eq!(body["locale"], "fr-FR");
        assert_eq!(body["mode"], "production");
        assert!(body["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn downloads_plugin_serves_model_artifact() {
        let mut model = tempfile::NamedTempFile::new().unwrap();
        model.write_all(b"{\"version\":1,\"locales\":{}}").unwrap();

        let config = ServerConfig {
            model_path: model.path().to_path_buf(),
            ..test_config()
        };
        let handle = start(config, StatusBus::default(), Arc::new(IntentPipelineFactory))
            .await
            .unwrap();

        let url = format!("http://127.0.0.1:{}/v4/downloads/model", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert!(resp.text().await.unwrap().contains("version"));
    }

    #[tokio::test]
    async fn downloads_plugin_404s_when_model_missing() {
        let config = ServerConfig {
            model_path: PathBuf::from("/nonexistent/model.json"),
            ..test_config()
        };
        let handle = start(config, StatusBus::default(), Arc::new(IntentPipelineFactory))
            .await
            .unwrap();

        let url = format!("http://127.0.0.1:{}/v4/downloads/model", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn bind_failure_is_reported_not_fatal() {
        let first = start(test_config(), StatusBus::default(), Arc::new(IntentPipelineFactory))
            .await
            .unwrap();

        // Second bind on the same port must fail with a Listen error.
        let config = ServerConfig {
            port: first.port,
            ..test_config()
        };
        let err = start(config, StatusBus::default(), Arc::new(IntentPipelineFactory)).await;
        assert!(matches!(err, Err(ServerError::Listen(_))));
    }

    #[test]
    fn server_config_from_core_config() {
        let (core, _) = Config::from_lookup(|key| match key {
            "ARIA_MODE" => Some("dev".into()),
            "ARIA_PORT" => Some("4321".into()),
            "ARIA_LOCALE" => Some("fr-FR".into()),
            _ => None,
        });
        let config = ServerConfig::from(&core);
        assert!(config.mode.is_dev());
        assert_eq!(config.port, 4321);
        assert_eq!(config.locale, "fr-FR");
        // Tuning knobs keep their defaults.
        assert_eq!(config.max_send_queue, 256);
    }
}
