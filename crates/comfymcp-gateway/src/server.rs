//! HTTP transport: `POST /mcp` for JSON-RPC, `GET /health` for probes

use crate::auth::ResolvedAuth;
use crate::rpc::McpHandler;
use crate::startup::Runtime;
use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use comfymcp_core::{GatewayConfig, RpcResponse, UNAUTHORIZED};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub struct GatewayState {
    pub handler: McpHandler,
    pub auth: ResolvedAuth,
    pub comfyui_url: String,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(runtime: &Runtime, auth: ResolvedAuth) -> Self {
        Self {
            handler: McpHandler::new(runtime.tools.clone()),
            auth,
            comfyui_url: runtime.ctx.client.base_url().to_string(),
            started_at: Instant::now(),
        }
    }
}

pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/mcp", post(mcp_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn start_gateway(runtime: &Runtime, gateway: &GatewayConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let env_token = std::env::var("COMFY_MCP_TOKEN").ok();
    let auth = ResolvedAuth::from_config(&gateway.auth, env_token);
    let state = Arc::new(GatewayState::new(runtime, auth));
    let app = build_router(state);

    let bind_addr: SocketAddr = format!("{}:{}", gateway.bind.to_addr(), gateway.port).parse()?;

    info!("comfymcp v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: {}", bind_addr);
    info!("  MCP endpoint: http://{}/mcp", bind_addr);
    info!("  Auth mode: {:?}", gateway.auth.mode);
    info!("  Tools: {}", runtime.tools.len());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn mcp_handler(State(state): State<Arc<GatewayState>>, headers: HeaderMap, body: String) -> Response {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    if let Err(e) = state.auth.verify_header(header) {
        warn!("Rejected /mcp request: {}", e);
        let id = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("id").cloned())
            .unwrap_or(Value::Null);
        return (StatusCode::UNAUTHORIZED, Json(RpcResponse::err(id, UNAUTHORIZED, e.to_string()))).into_response();
    }

    match state.handler.handle_text(&body).await {
        Some(resp) if resp.error.as_ref().is_some_and(|e| e.code == comfymcp_core::PARSE_ERROR) => {
            (StatusCode::BAD_REQUEST, Json(resp)).into_response()
        }
        Some(resp) => Json(resp).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "tools": state.handler.tools().len(),
        "comfyui_url": state.comfyui_url,
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}
