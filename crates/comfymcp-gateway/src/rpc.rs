//! MCP method router, shared by the HTTP and stdio transports
//!
//! Requests get exactly one response; notifications get none.

use comfymcp_core::{
    CallToolParams, RpcRequest, RpcResponse, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION,
    MCP_PROTOCOL_VERSION,
};
use comfymcp_tools::ToolRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const SERVER_NAME: &str = "comfymcp";

/// Result type for method handlers.
pub type RpcResult = Result<Value, (i32, String)>;

#[derive(Clone)]
pub struct McpHandler {
    tools: Arc<ToolRegistry>,
}

impl McpHandler {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Handle one parsed message. `None` for notifications.
    pub async fn handle(&self, req: RpcRequest) -> Option<RpcResponse> {
        if req.jsonrpc.as_deref().is_some_and(|v| v != JSONRPC_VERSION) {
            let id = req.id.unwrap_or(Value::Null);
            return Some(RpcResponse::err(id, INVALID_REQUEST, "jsonrpc must be \"2.0\""));
        }

        let Some(id) = req.id else {
            debug!("notification: {}", req.method);
            return None;
        };

        let result = self.route(&req.method, req.params).await;
        Some(to_response(id, result))
    }

    /// Parse and handle one raw JSON message.
    pub async fn handle_text(&self, text: &str) -> Option<RpcResponse> {
        match serde_json::from_str::<RpcRequest>(text) {
            Ok(req) => self.handle(req).await,
            Err(e) => {
                warn!("Unparseable JSON-RPC message: {}", e);
                Some(RpcResponse::parse_error(format!("Parse error: {}", e)))
            }
        }
    }

    async fn route(&self, method: &str, params: Value) -> RpcResult {
        match method {
            "initialize" => self.handle_initialize(params),
            "ping" => Ok(json!({})),
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(params).await,
            _ => Err((comfymcp_core::METHOD_NOT_FOUND, format!("Method not found: {}", method))),
        }
    }

    // -----------------------------------------------------------------------
    // initialize
    // -----------------------------------------------------------------------

    fn handle_initialize(&self, params: Value) -> RpcResult {
        let client = params["clientInfo"]["name"].as_str().unwrap_or("unknown");
        info!(
            "MCP initialize from {} (requested protocol {})",
            client,
            params["protocolVersion"].as_str().unwrap_or("-")
        );
        Ok(json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
        }))
    }

    // -----------------------------------------------------------------------
    // tools/list, tools/call
    // -----------------------------------------------------------------------

    fn handle_tools_list(&self) -> RpcResult {
        Ok(json!({ "tools": self.tools.definitions() }))
    }

    async fn handle_tools_call(&self, params: Value) -> RpcResult {
        let call: CallToolParams = serde_json::from_value(params)
            .map_err(|e| (INVALID_PARAMS, format!("Invalid tools/call params: {}", e)))?;
        if !self.tools.contains(&call.name) {
            return Err((INVALID_PARAMS, format!("Unknown tool: {}", call.name)));
        }

        let arguments = if call.arguments.is_null() { json!({}) } else { call.arguments };
        info!("tools/call {}", call.name);
        let started = std::time::Instant::now();
        let result = self.tools.execute(&call.name, arguments).await;
        if result.is_error() {
            warn!("{} failed in {:?}: {}", call.name, started.elapsed(), result.to_content_string());
        } else {
            debug!("{} completed in {:?}", call.name, started.elapsed());
        }

        serde_json::to_value(result.into_call_result())
            .map_err(|e| (comfymcp_core::INTERNAL_ERROR, e.to_string()))
    }
}

pub fn to_response(id: Value, result: RpcResult) -> RpcResponse {
    match result {
        Ok(value) => RpcResponse::ok(id, value),
        Err((code, message)) => RpcResponse::err(id, code, message),
    }
}
