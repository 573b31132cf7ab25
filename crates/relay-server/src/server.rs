use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{any, get};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use relay_core::config::GatewayConfig;

use crate::pairing::{self, PairingRegistry};
use crate::proxy;

/// Gateway server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub backend_http_base: String,
    pub backend_ws_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_gateway(&GatewayConfig::default())
    }
}

impl ServerConfig {
    pub fn from_gateway(config: &GatewayConfig) -> Self {
        Self {
            port: config.port,
            backend_http_base: config.backend_http_base(),
            backend_ws_url: config.backend_ws_url(),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub http: reqwest::Client,
    pub backend_base: String,
    pub backend_ws_url: String,
    pub pairings: Arc<PairingRegistry>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/{*path}", any(proxy::proxy_api))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the gateway. Returns a handle that keeps it alive.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, std::io::Error> {
    let state = AppState {
        http: reqwest::Client::new(),
        backend_base: config.backend_http_base.clone(),
        backend_ws_url: config.backend_ws_url.clone(),
        pairings: Arc::new(PairingRegistry::new()),
    };
    let pairings = Arc::clone(&state.pairings);

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        port = local_addr.port(),
        backend = %config.backend_http_base,
        "gateway started"
    );

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        pairings,
        _server: server,
    })
}

/// Handle returned by `start()` — keeps the server task alive.
pub struct ServerHandle {
    pub port: u16,
    pub pairings: Arc<PairingRegistry>,
    _server: tokio::task::JoinHandle<()>,
}

/// Upgrade `/ws` requests and hand the socket to a backend pairing.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let backend_ws_url = state.backend_ws_url.clone();
    let pairings = Arc::clone(&state.pairings);
    ws.on_upgrade(move |socket| pairing::run(socket, backend_ws_url, pairings))
}

/// Gateway liveness. Reports the gateway itself, not the backend: an
/// unreachable backend surfaces through the proxies, not here.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "pairings": state.pairings.count(),
    }))
}
