//! Tests for comfymcp-gateway: method routing, stdio framing, HTTP transport

use comfymcp_client::CredentialStore;
use comfymcp_core::config::ConfigFile;
use comfymcp_core::{AuthMode, ComfyConfig, RpcRequest, RpcResponse};
use comfymcp_gateway::auth::ResolvedAuth;
use comfymcp_gateway::startup::spawn_asset_cleanup;
use comfymcp_gateway::*;
use comfymcp_tools::ToolContext;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn runtime(dir: &tempfile::TempDir) -> Runtime {
    let workflows = dir.path().join("workflows");
    std::fs::create_dir_all(&workflows).unwrap();
    std::fs::write(
        workflows.join("generate_image.json"),
        json!({"6": {"class_type": "CLIPTextEncode", "inputs": {"text": "PARAM_PROMPT"}}}).to_string(),
    )
    .unwrap();

    let mut config = ComfyConfig::resolve(&ConfigFile::default(), |k| match k {
        "COMFYUI_URL" => Some("http://127.0.0.1:1".into()),
        "COMFY_MCP_WORKFLOW_DIR" => Some(workflows.display().to_string()),
        _ => None,
    });
    config.config_path = dir.path().join("config.json");
    Runtime::new(ToolContext::build(config, dir.path().to_path_buf(), CredentialStore::in_memory()))
}

fn request(v: Value) -> RpcRequest {
    serde_json::from_value(v).unwrap()
}

async fn call(handler: &McpHandler, v: Value) -> RpcResponse {
    handler.handle(request(v)).await.expect("response")
}

async fn spawn_gateway(rt: &Runtime, auth: ResolvedAuth) -> String {
    let state = Arc::new(GatewayState::new(rt, auth));
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

// ===========================================================================
// Method routing
// ===========================================================================

#[tokio::test]
async fn initialize_reports_server_and_capabilities() {
    let dir = tempfile::tempdir().unwrap();
    let handler = McpHandler::new(runtime(&dir).tools);
    let resp = call(
        &handler,
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize",
               "params": {"protocolVersion": "2025-03-26", "clientInfo": {"name": "test"}}}),
    )
    .await;
    let result = resp.result.unwrap();
    assert_eq!(resp.id, json!(1));
    assert_eq!(result["protocolVersion"], comfymcp_core::MCP_PROTOCOL_VERSION);
    assert_eq!(result["serverInfo"]["name"], "comfymcp");
    assert!(result["capabilities"]["tools"].is_object());
}

#[tokio::test]
async fn notifications_get_no_response() {
    let dir = tempfile::tempdir().unwrap();
    let handler = McpHandler::new(runtime(&dir).tools);
    let none = handler
        .handle(request(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})))
        .await;
    assert!(none.is_none());
    let unknown = handler.handle(request(json!({"jsonrpc": "2.0", "method": "whatever"}))).await;
    assert!(unknown.is_none());
}

#[tokio::test]
async fn ping_and_unknown_method() {
    let dir = tempfile::tempdir().unwrap();
    let handler = McpHandler::new(runtime(&dir).tools);
    let pong = call(&handler, json!({"jsonrpc": "2.0", "id": "a", "method": "ping"})).await;
    assert_eq!(pong.result, Some(json!({})));
    assert_eq!(pong.id, json!("a"));

    let missing = call(&handler, json!({"jsonrpc": "2.0", "id": 2, "method": "resources/list"})).await;
    assert_eq!(missing.error.unwrap().code, comfymcp_core::METHOD_NOT_FOUND);

    let wrong_version = call(&handler, json!({"jsonrpc": "1.0", "id": 3, "method": "ping"})).await;
    assert_eq!(wrong_version.error.unwrap().code, comfymcp_core::INVALID_REQUEST);
}

#[tokio::test]
async fn tools_list_includes_builtins_and_workflows() {
    let dir = tempfile::tempdir().unwrap();
    let handler = McpHandler::new(runtime(&dir).tools);
    let resp = call(&handler, json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})).await;
    let tools = resp.result.unwrap()["tools"].as_array().cloned().unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert!(names.contains(&"run_workflow"));
    assert!(names.contains(&"generate_image"));
    assert!(tools.iter().all(|t| t["inputSchema"]["type"] == "object"));
}

#[tokio::test]
async fn tools_call_returns_content() {
    let dir = tempfile::tempdir().unwrap();
    let handler = McpHandler::new(runtime(&dir).tools);
    let resp = call(
        &handler,
        json!({"jsonrpc": "2.0", "id": 7, "method": "tools/call", "params": {"name": "list_workflows"}}),
    )
    .await;
    let result = resp.result.unwrap();
    assert_eq!(result["isError"], false);
    assert_eq!(result["content"][0]["type"], "text");
    assert_eq!(result["structuredContent"]["count"], 1);
}

#[tokio::test]
async fn tools_call_failures() {
    let dir = tempfile::tempdir().unwrap();
    let handler = McpHandler::new(runtime(&dir).tools);

    let unknown = call(
        &handler,
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": "nope"}}),
    )
    .await;
    assert_eq!(unknown.error.unwrap().code, comfymcp_core::INVALID_PARAMS);

    let malformed = call(&handler, json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {}})).await;
    assert_eq!(malformed.error.unwrap().code, comfymcp_core::INVALID_PARAMS);

    // Tool-level failures are results, not protocol errors.
    let failed = call(
        &handler,
        json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call",
               "params": {"name": "get_asset_metadata", "arguments": {"asset_id": "missing"}}}),
    )
    .await;
    let result = failed.result.unwrap();
    assert_eq!(result["isError"], true);
    assert!(result["content"][0]["text"].as_str().unwrap().starts_with("Error:"));
}

#[tokio::test]
async fn parse_error_has_null_id() {
    let dir = tempfile::tempdir().unwrap();
    let handler = McpHandler::new(runtime(&dir).tools);
    let resp = handler.handle_text("{not json").await.unwrap();
    assert_eq!(resp.id, Value::Null);
    assert_eq!(resp.error.unwrap().code, comfymcp_core::PARSE_ERROR);
}

// ===========================================================================
// stdio
// ===========================================================================

#[tokio::test]
async fn stdio_answers_each_request_line() {
    let dir = tempfile::tempdir().unwrap();
    let handler = McpHandler::new(runtime(&dir).tools);
    let input = concat!(
        "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n",
        "\n",
        "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
        "garbage\n",
        "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"tools/list\"}\n",
    );
    let mut out = Vec::new();
    serve_stdio(&handler, input.as_bytes(), &mut out, CancellationToken::new())
        .await
        .unwrap();

    let lines: Vec<Value> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["id"], 1);
    assert_eq!(lines[1]["error"]["code"], comfymcp_core::PARSE_ERROR);
    assert_eq!(lines[2]["id"], 2);
    assert!(lines[2]["result"]["tools"].is_array());
}

// ===========================================================================
// HTTP
// ===========================================================================

#[tokio::test]
async fn http_health_and_mcp() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(&dir);
    let base = spawn_gateway(&rt, ResolvedAuth::open()).await;
    let http = reqwest::Client::new();

    let health: Value = http.get(format!("{}/health", base)).send().await.unwrap().json().await.unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["tools"], rt.tools.len());

    let resp = http
        .post(format!("{}/mcp", base))
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"], json!({}));

    let note = http
        .post(format!("{}/mcp", base))
        .json(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .send()
        .await
        .unwrap();
    assert_eq!(note.status(), 202);

    let bad = http.post(format!("{}/mcp", base)).body("{oops").send().await.unwrap();
    assert_eq!(bad.status(), 400);
}

#[tokio::test]
async fn http_token_auth() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(&dir);
    let auth = ResolvedAuth { mode: AuthMode::Token, token: Some("s3cret".into()) };
    let base = spawn_gateway(&rt, auth).await;
    let http = reqwest::Client::new();
    let ping = json!({"jsonrpc": "2.0", "id": 9, "method": "ping"});

    let denied = http.post(format!("{}/mcp", base)).json(&ping).send().await.unwrap();
    assert_eq!(denied.status(), 401);
    let body: Value = denied.json().await.unwrap();
    assert_eq!(body["id"], 9);
    assert_eq!(body["error"]["code"], comfymcp_core::UNAUTHORIZED);

    let wrong = http.post(format!("{}/mcp", base)).bearer_auth("nope").json(&ping).send().await.unwrap();
    assert_eq!(wrong.status(), 401);

    let ok = http.post(format!("{}/mcp", base)).bearer_auth("s3cret").json(&ping).send().await.unwrap();
    assert_eq!(ok.status(), 200);

    let health = http.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(health.status(), 200);
}

// ===========================================================================
// Background maintenance
// ===========================================================================

#[tokio::test]
async fn asset_cleanup_stops_on_cancel() {
    let assets = Arc::new(comfymcp_assets::AssetRegistry::new(1, "http://127.0.0.1:1"));
    let cancel = CancellationToken::new();
    let task = spawn_asset_cleanup(assets, Duration::from_millis(10), cancel.clone());
    tokio::time::sleep(Duration::from_millis(30)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
}
