//! Tests for comfymcp-tools: ToolResult, ToolRegistry, and every builtin tool
//! against a mock ComfyUI

use axum::{
    extract::Path as AxumPath,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use comfymcp_client::CredentialStore;
use comfymcp_core::config::ConfigFile;
use comfymcp_core::{ComfyConfig, ToolContent};
use comfymcp_tools::*;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SOURCE_WIDTH: u32 = 1024;
const SOURCE_HEIGHT: u32 = 640;

/// The PNG every mock `/view` request returns.
fn sample_png() -> Vec<u8> {
    let img = image::RgbaImage::from_fn(SOURCE_WIDTH, SOURCE_HEIGHT, |x, y| {
        image::Rgba([(x % 251) as u8, (y % 241) as u8, ((x * y) % 239) as u8, 255])
    });
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut out, image::ImageOutputFormat::Png)
        .unwrap();
    out.into_inner()
}

fn decoded_size(b64: &str) -> (u32, u32) {
    use base64::Engine as _;
    let raw = base64::engine::general_purpose::STANDARD.decode(b64).unwrap();
    let img = image::load_from_memory(&raw).unwrap();
    (img.width(), img.height())
}

async fn spawn_mock(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn mock_comfyui() -> Router {
    Router::new()
        .route(
            "/system_stats",
            get(|| async { Json(json!({"devices": [{"vram_total": 8_000_000_000u64, "vram_free": 6_000_000_000u64}]})) }),
        )
        .route("/prompt", post(|| async { Json(json!({"prompt_id": "p-1", "number": 0})) }))
        .route(
            "/history/:id",
            get(|AxumPath(id): AxumPath<String>| async move {
                let mut history = serde_json::Map::new();
                history.insert(
                    id,
                    json!({
                        "outputs": {"9": {"images": [{"filename": "ComfyUI_00001_.png", "subfolder": "", "type": "output"}]}},
                        "status": {"status_str": "success", "completed": true}
                    }),
                );
                Json(Value::Object(history))
            }),
        )
        .route(
            "/queue",
            get(|| async { Json(json!({"queue_running": [[3, "run-1", {}]], "queue_pending": [[4, "pend-1", {}]]})) })
                .post(|| async { Json(json!({})) }),
        )
        .route("/interrupt", post(|| async { Json(json!({})) }))
        .route(
            "/object_info/:class",
            get(|AxumPath(class): AxumPath<String>| async move {
                let required = match class.as_str() {
                    "CheckpointLoaderSimple" => json!({"ckpt_name": [["sd15.safetensors", "sdxl.safetensors"]]}),
                    "LoraLoader" => json!({"lora_name": [["detail.safetensors"]], "strength_model": ["FLOAT", {}]}),
                    "KSampler" => json!({
                        "sampler_name": [["euler", "dpmpp_2m", "ddim"]],
                        "scheduler": [["normal", "karras"]]
                    }),
                    _ => return Json(json!({})),
                };
                Json(json!({ class: {"input": {"required": required}} }))
            }),
        )
        .route("/view", get(|| async { sample_png() }))
        .route(
            "/upload/image",
            post(|| async { Json(json!({"name": "uploaded.png", "subfolder": "", "type": "input"})) }),
        )
}

fn generate_image() -> Value {
    json!({
        "3": {"class_type": "KSampler", "inputs": {
            "seed": "PARAM_INT_SEED", "steps": "PARAM_INT_STEPS", "cfg": 1.0,
            "model": ["4", 0], "positive": ["6", 0], "latent_image": ["5", 0]
        }},
        "4": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "PARAM_MODEL"}},
        "5": {"class_type": "EmptyLatentImage", "inputs": {"width": "PARAM_INT_WIDTH", "height": "PARAM_INT_HEIGHT", "batch_size": 1}},
        "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "PARAM_PROMPT", "clip": ["4", 1]}},
        "9": {"class_type": "SaveImage", "inputs": {"filename_prefix": "ComfyUI", "images": ["8", 0]}}
    })
}

fn write_json(dir: &Path, name: &str, value: &Value) {
    std::fs::write(dir.join(name), serde_json::to_string_pretty(value).unwrap()).unwrap();
}

struct Harness {
    ctx: ToolContext,
    registry: ToolRegistry,
    dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    harness_with(spawn_mock(mock_comfyui()).await).await
}

async fn harness_with(base: String) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let workflows = dir.path().join("workflows");
    std::fs::create_dir_all(&workflows).unwrap();
    write_json(&workflows, "generate_image.json", &generate_image());
    write_json(
        &workflows,
        "static_graph.json",
        &json!({"1": {"class_type": "SaveImage", "inputs": {"filename_prefix": "x"}}}),
    );
    write_json(
        &workflows,
        "list_models.json",
        &json!({"1": {"class_type": "CLIPTextEncode", "inputs": {"text": "PARAM_PROMPT"}}}),
    );

    let env: HashMap<&str, String> = HashMap::from([
        ("COMFYUI_URL", base),
        ("COMFY_MCP_WORKFLOW_DIR", workflows.display().to_string()),
        ("COMFYUI_OUTPUT_ROOT", dir.path().join("output").display().to_string()),
    ]);
    let mut config = ComfyConfig::resolve(&ConfigFile::default(), |k| env.get(k).cloned());
    config.config_path = dir.path().join("config.json");
    config.generation_timeout_secs = 5;

    let ctx = ToolContext::build(config, dir.path().to_path_buf(), CredentialStore::in_memory());
    let registry = create_default_registry(&ctx);
    Harness { ctx, registry, dir }
}

fn ok_json(result: ToolResult) -> Value {
    assert!(!result.is_error(), "tool failed: {}", result.to_content_string());
    result.as_json().cloned().expect("json result")
}

async fn generate(h: &Harness) -> Value {
    ok_json(
        h.registry
            .execute("generate_image", json!({"prompt": "a red fox", "model": "sd15.safetensors", "width": 512, "height": 768, "steps": 4}))
            .await,
    )
}

// ===========================================================================
// ToolResult
// ===========================================================================

#[test]
fn tool_result_text_and_error() {
    assert_eq!(ToolResult::text("hi").to_content_string(), "hi");
    let err = ToolResult::error("boom");
    assert!(err.is_error());
    assert_eq!(err.to_content_string(), "Error: boom");

    let call = err.into_call_result();
    assert!(call.is_error);
    assert_eq!(call.content, vec![ToolContent::text("Error: boom")]);
}

#[test]
fn tool_result_json_carries_structured_content() {
    let call = ToolResult::Json(json!({"key": "value"})).into_call_result();
    assert!(!call.is_error);
    assert_eq!(call.structured_content, Some(json!({"key": "value"})));
    match &call.content[0] {
        ToolContent::Text { text } => assert!(text.contains("\"key\"")),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn tool_result_content_passthrough() {
    let blocks = vec![ToolContent::Image { data: "AAAA".into(), mime_type: "image/png".into() }];
    let r = ToolResult::Content(blocks.clone());
    assert_eq!(r.to_content_string(), "[image/png image]");
    assert_eq!(r.into_call_result().content, blocks);
}

// ===========================================================================
// ToolRegistry
// ===========================================================================

#[tokio::test]
async fn registry_default_is_empty() {
    let reg = ToolRegistry::new();
    assert!(reg.is_empty());
    assert!(reg.definitions().is_empty());
    let result = reg.execute("nonexistent", json!({})).await;
    assert!(result.to_content_string().contains("not found"));
}

#[tokio::test]
async fn default_registry_has_builtins_and_workflow_tools() {
    let h = harness().await;
    let names = h.registry.list();
    for expected in [
        "list_workflows", "run_workflow", "validate_workflow", "view_image", "list_assets",
        "get_asset_metadata", "resolve_asset", "get_asset_local_path", "publish_asset",
        "get_publish_info", "set_publish_dir", "get_queue_status", "get_job", "cancel_job",
        "interrupt", "health_check", "list_models", "get_defaults", "set_defaults",
        "set_webhook", "remove_webhook", "list_webhooks", "get_webhook_log", "update_webhook",
        "credentials_status", "generate_image", "batch_generate", "batch_generate_seeds",
        "generate_variations", "list_loras", "list_controlnet_models", "list_vae_models",
        "list_upscale_models", "list_samplers", "list_schedulers", "refresh_model_cache",
    ] {
        assert!(names.contains(&expected), "missing {}", expected);
    }
    assert!(!names.contains(&"static_graph"));
    assert_eq!(names.len(), 36);

    let defs = h.registry.definitions();
    let sorted: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
    let mut expected = sorted.clone();
    expected.sort_unstable();
    assert_eq!(sorted, expected);
    assert!(defs.iter().all(|d| d.input_schema.is_object() && !d.description.is_empty()));
}

#[tokio::test]
async fn workflow_tool_name_collision_keeps_builtin() {
    let h = harness().await;
    let tool = h.registry.get("list_models").unwrap();
    assert!(tool.description().contains("Checkpoint models"));
    assert!(tool.is_read_only());
}

#[tokio::test]
async fn workflow_tool_schema_lists_parameters() {
    let h = harness().await;
    let schema = h.registry.get("generate_image").unwrap().input_schema();
    assert_eq!(schema["required"], json!(["prompt"]));
    assert_eq!(schema["properties"]["width"]["type"], "integer");
    assert_eq!(schema["properties"]["return_inline_preview"]["type"], "boolean");
}

// ===========================================================================
// Workflow tools
// ===========================================================================

#[tokio::test]
async fn list_workflows_reports_catalog() {
    let h = harness().await;
    let v = ok_json(h.registry.execute("list_workflows", json!({})).await);
    assert_eq!(v["count"], 3);
    let ids: Vec<&str> = v["workflows"].as_array().unwrap().iter().map(|w| w["id"].as_str().unwrap()).collect();
    assert!(ids.contains(&"generate_image"));
}

#[tokio::test]
async fn generated_tool_runs_and_registers_asset() {
    let h = harness().await;
    let v = generate(&h).await;
    assert_eq!(v["filename"], "ComfyUI_00001_.png");
    assert_eq!(v["mime_type"], "image/png");
    assert_eq!(v["width"], 512);
    assert_eq!(v["height"], 768);
    assert_eq!(v["prompt_id"], "p-1");
    assert_eq!(v["workflow_id"], "generate_image");
    assert_eq!(v["tool"], "generate_image");
    assert!(v["expires_at"].is_string());
    assert!(v.get("inline_preview_base64").is_none());

    let asset_id = v["asset_id"].as_str().unwrap();
    let record = h.ctx.assets.get(asset_id).unwrap();
    let submitted = record.submitted_workflow.unwrap();
    assert_eq!(submitted["6"]["inputs"]["text"], "a red fox");
    assert!(submitted["3"]["inputs"]["seed"].is_u64());
}

#[tokio::test]
async fn run_workflow_with_inline_preview() {
    let h = harness().await;
    let v = ok_json(
        h.registry
            .execute(
                "run_workflow",
                json!({
                    "workflow_id": "generate_image",
                    "overrides": {"prompt": "x", "model": "sd15.safetensors", "width": 64, "height": 64},
                    "return_inline_preview": true,
                    "session_id": "s-1"
                }),
            )
            .await,
    );
    assert_eq!(v["inline_preview_mime_type"], "image/jpeg");
    assert_eq!(v["inline_preview_size"], json!([512, 320]));
    let preview = v["inline_preview_base64"].as_str().unwrap();
    assert!(preview.len() <= 100_000);
    assert_eq!(decoded_size(preview), (512, 320));
    assert_eq!(h.ctx.assets.list(10, None, Some("s-1")).len(), 1);
}

#[tokio::test]
async fn dimensions_fall_back_to_the_image_itself() {
    let h = harness().await;
    // No EmptyLatentImage node, so the size has to come from the output file.
    let v = ok_json(
        h.registry
            .execute("run_workflow", json!({"workflow_id": "list_models", "overrides": {"prompt": "x"}}))
            .await,
    );
    assert_eq!(v["width"], SOURCE_WIDTH);
    assert_eq!(v["height"], SOURCE_HEIGHT);
    assert!(v["bytes_size"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn run_workflow_errors() {
    let h = harness().await;
    let missing = h
        .registry
        .execute("run_workflow", json!({"workflow_id": "generate_image", "overrides": {"model": "m"}}))
        .await;
    assert!(missing.is_error());
    assert!(missing.to_content_string().contains("prompt"));

    let unknown = h.registry.execute("run_workflow", json!({"workflow_id": "nope"})).await;
    assert!(unknown.is_error());

    let traversal = h.registry.execute("run_workflow", json!({"workflow_id": "../etc/passwd"})).await;
    assert!(traversal.is_error());

    let no_id = h.registry.execute("run_workflow", json!({})).await;
    assert!(no_id.to_content_string().contains("workflow_id"));
}

#[tokio::test]
async fn validate_workflow_without_metadata_is_ready() {
    let h = harness().await;
    let v = ok_json(h.registry.execute("validate_workflow", json!({"workflow_id": "generate_image"})).await);
    assert_eq!(v["ready"], true);
    assert_eq!(v["warnings"].as_array().unwrap().len(), 1);
}

// ===========================================================================
// Asset tools
// ===========================================================================

#[tokio::test]
async fn view_image_modes() {
    let h = harness().await;
    let asset_id = generate(&h).await["asset_id"].as_str().unwrap().to_string();

    let meta = ok_json(h.registry.execute("view_image", json!({"asset_id": asset_id, "mode": "metadata"})).await);
    assert_eq!(meta["asset_id"], asset_id.as_str());
    assert!(meta["asset_url"].as_str().unwrap().contains("/view?filename=ComfyUI_00001_.png"));

    match h.registry.execute("view_image", json!({"asset_id": asset_id})).await {
        ToolResult::Content(blocks) => match &blocks[0] {
            ToolContent::Image { data, mime_type } => {
                assert_eq!(mime_type, "image/jpeg");
                assert!(data.len() <= 100_000);
                assert_eq!(decoded_size(data), (512, 320));
            }
            other => panic!("unexpected {:?}", other),
        },
        other => panic!("unexpected {:?}", other),
    }

    match h.registry.execute("view_image", json!({"asset_id": asset_id, "max_dim": 128})).await {
        ToolResult::Content(blocks) => match &blocks[0] {
            ToolContent::Image { data, .. } => assert_eq!(decoded_size(data), (128, 80)),
            other => panic!("unexpected {:?}", other),
        },
        other => panic!("unexpected {:?}", other),
    }

    let refused = h
        .registry
        .execute("view_image", json!({"asset_id": asset_id, "max_b64_chars": 10}))
        .await;
    assert!(!refused.is_error());
    assert!(refused.to_content_string().contains("Could not inline image"));

    let bad_mode = h.registry.execute("view_image", json!({"asset_id": asset_id, "mode": "full"})).await;
    assert!(bad_mode.is_error());

    let missing = h.registry.execute("view_image", json!({"asset_id": "nope"})).await;
    assert!(missing.to_content_string().contains("not found"));
}

#[tokio::test]
async fn list_and_describe_assets() {
    let h = harness().await;
    let asset_id = generate(&h).await["asset_id"].as_str().unwrap().to_string();

    let listed = ok_json(h.registry.execute("list_assets", json!({})).await);
    assert_eq!(listed["count"], 1);
    let filtered = ok_json(h.registry.execute("list_assets", json!({"workflow_id": "other"})).await);
    assert_eq!(filtered["count"], 0);

    let full = ok_json(h.registry.execute("get_asset_metadata", json!({"asset_id": asset_id})).await);
    assert!(full["submitted_workflow"].is_object());
    assert!(full["comfy_history"].is_object());
    assert!(full["asset_url"].is_string());
}

#[tokio::test]
async fn resolve_asset_uploads_media() {
    let h = harness().await;
    let asset_id = generate(&h).await["asset_id"].as_str().unwrap().to_string();
    let v = ok_json(h.registry.execute("resolve_asset", json!({"asset_id": asset_id})).await);
    assert_eq!(v["input_filename"], "uploaded.png");
    assert_eq!(v["original_filename"], "ComfyUI_00001_.png");
}

#[tokio::test]
async fn asset_local_path_uses_output_root() {
    let h = harness().await;
    let asset_id = generate(&h).await["asset_id"].as_str().unwrap().to_string();

    let missing = h.registry.execute("get_asset_local_path", json!({"asset_id": asset_id})).await;
    assert!(missing.to_content_string().contains("COMFYUI_OUTPUT_ROOT"));

    let out = h.dir.path().join("output");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("ComfyUI_00001_.png"), b"png").unwrap();
    let v = ok_json(h.registry.execute("get_asset_local_path", json!({"asset_id": asset_id})).await);
    assert!(v["local_path"].as_str().unwrap().ends_with("ComfyUI_00001_.png"));
}

// ===========================================================================
// Publish tools
// ===========================================================================

#[tokio::test]
async fn publish_asset_into_configured_dir() {
    let h = harness().await;
    let asset_id = generate(&h).await["asset_id"].as_str().unwrap().to_string();

    let unset = ok_json(h.registry.execute("get_publish_info", json!({})).await);
    assert_eq!(unset["source"], "unset");

    let site = h.dir.path().join("site/img");
    let set = ok_json(h.registry.execute("set_publish_dir", json!({"path": site.display().to_string()})).await);
    assert_eq!(set["success"], true);

    let published = ok_json(
        h.registry
            .execute("publish_asset", json!({"asset_id": asset_id, "target_filename": "hero.png", "manifest_key": "hero"}))
            .await,
    );
    assert_eq!(published["filename"], "hero.png");
    assert_eq!(published["bytes"], sample_png().len());
    assert!(site.join("hero.png").exists());

    let info = ok_json(h.registry.execute("get_publish_info", json!({})).await);
    assert_eq!(info["source"], "configured");
    assert_eq!(info["manifest"]["hero"], "hero.png");

    let bad = h
        .registry
        .execute("publish_asset", json!({"asset_id": asset_id, "target_filename": "../x.png"}))
        .await;
    assert!(bad.is_error());

    let relative = h.registry.execute("set_publish_dir", json!({"path": "relative/dir"})).await;
    assert!(relative.is_error());
}

// ===========================================================================
// Job tools
// ===========================================================================

#[tokio::test]
async fn job_tools() {
    let h = harness().await;
    let queue = ok_json(h.registry.execute("get_queue_status", json!({})).await);
    assert_eq!(queue["running_count"], 1);
    assert_eq!(queue["pending_count"], 1);

    let job = ok_json(h.registry.execute("get_job", json!({"prompt_id": "p-9"})).await);
    assert_eq!(job["status"], "completed");
    assert_eq!(job["prompt_id"], "p-9");

    let cancelled = ok_json(h.registry.execute("cancel_job", json!({"prompt_id": "pend-1"})).await);
    assert_eq!(cancelled["success"], true);

    let interrupted = ok_json(h.registry.execute("interrupt", json!({})).await);
    assert_eq!(interrupted["success"], true);
}

#[tokio::test]
async fn job_tools_report_unreachable_comfyui() {
    let h = harness_with("http://127.0.0.1:1".into()).await;
    assert!(h.registry.execute("get_queue_status", json!({})).await.is_error());
    let run = h
        .registry
        .execute("generate_image", json!({"prompt": "x", "model": "m"}))
        .await;
    assert!(run.is_error());
}

// ===========================================================================
// Configuration tools
// ===========================================================================

#[tokio::test]
async fn health_check_reports_status() {
    let h = harness().await;
    let degraded = ok_json(h.registry.execute("health_check", json!({})).await);
    assert_eq!(degraded["status"], "degraded");
    assert_eq!(degraded["comfyui"]["connected"], true);
    assert!(degraded["comfyui"]["vram_free_gb"].as_f64().unwrap() > 5.0);

    let models = ok_json(h.registry.execute("list_models", json!({"refresh": true})).await);
    assert_eq!(models["count"], 2);

    let healthy = ok_json(h.registry.execute("health_check", json!({})).await);
    assert_eq!(healthy["status"], "healthy", "{}", healthy);
    assert_eq!(healthy["workflows"]["count"], 2);
}

#[tokio::test]
async fn health_check_unreachable_is_unhealthy() {
    let h = harness_with("http://127.0.0.1:1".into()).await;
    let v = ok_json(h.registry.execute("health_check", json!({})).await);
    assert_eq!(v["status"], "unhealthy");
}

#[tokio::test]
async fn set_and_get_defaults() {
    let h = harness().await;
    h.ctx.client.set_available_models(vec!["sdxl.safetensors".into()]);

    let bad = h
        .registry
        .execute("set_defaults", json!({"image": {"model": "missing.safetensors"}}))
        .await;
    assert!(bad.is_error());
    assert!(bad.to_content_string().contains("missing.safetensors"));

    let ok = ok_json(
        h.registry
            .execute("set_defaults", json!({"image": {"model": "sdxl.safetensors", "width": 1024}, "persist": true}))
            .await,
    );
    assert_eq!(ok["updated"]["image"]["width"], 1024);

    let all = ok_json(h.registry.execute("get_defaults", json!({})).await);
    assert_eq!(all["image"]["model"], "sdxl.safetensors");
    assert_eq!(all["image"]["width"], 1024);
    assert!(all["3d"].is_object());

    let saved: Value = serde_json::from_str(&std::fs::read_to_string(h.dir.path().join("config.json")).unwrap()).unwrap();
    assert_eq!(saved["defaults"]["image"]["width"], 1024);

    let nothing = h.registry.execute("set_defaults", json!({})).await;
    assert!(nothing.is_error());
}

// ===========================================================================
// Model tools
// ===========================================================================

#[tokio::test]
async fn node_option_listings() {
    let h = harness().await;
    let loras = ok_json(h.registry.execute("list_loras", json!({})).await);
    assert_eq!(loras["loras"], json!(["detail.safetensors"]));
    assert_eq!(loras["count"], 1);

    let samplers = ok_json(h.registry.execute("list_samplers", json!({})).await);
    assert_eq!(samplers["samplers"], json!(["euler", "dpmpp_2m", "ddim"]));
    let schedulers = ok_json(h.registry.execute("list_schedulers", json!({})).await);
    assert_eq!(schedulers["schedulers"], json!(["normal", "karras"]));

    // Loader node not installed: empty list, not an error.
    let vae = ok_json(h.registry.execute("list_vae_models", json!({})).await);
    assert_eq!(vae["vae_models"], json!([]));
    assert_eq!(vae["count"], 0);
}

#[tokio::test]
async fn node_option_listing_unreachable_is_error() {
    let h = harness_with("http://127.0.0.1:1".into()).await;
    let result = h.registry.execute("list_upscale_models", json!({})).await;
    assert!(result.is_error());
    assert!(result.to_content_string().contains("UpscaleModelLoader"));
}

#[tokio::test]
async fn refresh_model_cache_rereads_checkpoints() {
    let h = harness().await;
    assert!(h.ctx.client.available_models().is_empty());
    let v = ok_json(h.registry.execute("refresh_model_cache", json!({})).await);
    assert_eq!(v["success"], true);
    assert_eq!(v["checkpoint_count"], 2);
    assert_eq!(h.ctx.client.available_models().len(), 2);
}

// ===========================================================================
// Batches & variations
// ===========================================================================

#[tokio::test]
async fn batch_generate_merges_params_per_item() {
    let h = harness().await;
    let v = ok_json(
        h.registry
            .execute(
                "batch_generate",
                json!({
                    "workflow_id": "generate_image",
                    "base_params": {"prompt": "an apple", "model": "sd15.safetensors"},
                    "variations": [{"steps": 4}, {"steps": 8}, {"bogus": 1}],
                    "common_seed": 42
                }),
            )
            .await,
    );
    assert_eq!(v["workflow_id"], "generate_image");
    assert_eq!(v["total_requested"], 3);
    assert_eq!(v["successful"], 2);
    assert_eq!(v["failed"], 1);
    assert_eq!(v["results"][1]["params"]["steps"], 8);
    assert_eq!(v["results"][1]["params"]["seed"], 42);
    assert_eq!(v["results"][0]["result"]["tool"], "batch_generate[0]");
    assert_eq!(v["errors"][0]["index"], 2);
    assert!(v["errors"][0]["error"].as_str().unwrap().contains("bogus"));

    let empty = h
        .registry
        .execute("batch_generate", json!({"workflow_id": "generate_image", "variations": []}))
        .await;
    assert!(empty.is_error());
    let unknown = h
        .registry
        .execute("batch_generate", json!({"workflow_id": "nope", "variations": [{}]}))
        .await;
    assert!(unknown.to_content_string().contains("generate_image"));
}

#[tokio::test]
async fn batch_generate_seeds_counts_up_from_start() {
    let h = harness().await;
    let v = ok_json(
        h.registry
            .execute(
                "batch_generate_seeds",
                json!({
                    "workflow_id": "generate_image",
                    "params": {"prompt": "a dragon", "model": "sd15.safetensors"},
                    "count": 3,
                    "start_seed": 100
                }),
            )
            .await,
    );
    assert_eq!(v["seeds_used"], json!([100, 101, 102]));
    assert_eq!(v["successful"], 3);
    assert_eq!(v["errors"], Value::Null);
    assert_eq!(v["results"][2]["seed"], 102);

    let record = h.ctx.assets.get(v["results"][2]["result"]["asset_id"].as_str().unwrap()).unwrap();
    assert_eq!(record.submitted_workflow.unwrap()["3"]["inputs"]["seed"], 102);

    let no_seed = h
        .registry
        .execute("batch_generate_seeds", json!({"workflow_id": "list_models", "params": {"prompt": "x"}}))
        .await;
    assert!(no_seed.to_content_string().contains("no seed parameter"));
}

#[tokio::test]
async fn generate_variations_runs_img2img_per_seed() {
    let h = harness().await;
    let asset_id = generate(&h).await["asset_id"].as_str().unwrap().to_string();

    let v = ok_json(
        h.registry
            .execute(
                "generate_variations",
                json!({"asset_id": asset_id, "num_variations": 2, "seed": 5, "variation_strength": 0.3, "model": "sd15.safetensors"}),
            )
            .await,
    );
    assert_eq!(v["count"], 2);
    assert_eq!(v["base_seed"], 5);
    assert_eq!(v["original_asset_id"], asset_id.as_str());
    assert_eq!(v["variations"][1]["seed"], 6);
    assert_eq!(v["variations"][1]["variation_index"], 2);
    assert_eq!(v["variations"][0]["tool"], "generate_variations");

    let record = h.ctx.assets.get(v["variations"][1]["asset_id"].as_str().unwrap()).unwrap();
    let graph = record.submitted_workflow.unwrap();
    assert_eq!(graph["2"]["inputs"]["image"], "uploaded.png");
    assert_eq!(graph["6"]["inputs"]["denoise"], 0.3);

    let too_many = h
        .registry
        .execute("generate_variations", json!({"asset_id": asset_id, "num_variations": 9}))
        .await;
    assert!(too_many.is_error());
    let too_strong = h
        .registry
        .execute("generate_variations", json!({"asset_id": asset_id, "variation_strength": 1.5}))
        .await;
    assert!(too_strong.is_error());
    let missing = h.registry.execute("generate_variations", json!({"asset_id": "nope"})).await;
    assert!(missing.to_content_string().contains("not found"));
}

// ===========================================================================
// Webhook tools
// ===========================================================================

#[tokio::test]
async fn webhook_tool_lifecycle() {
    let h = harness().await;
    let created = ok_json(
        h.registry
            .execute("set_webhook", json!({"url": "https://example.com/h", "events": ["job_failed"], "secret": "s"}))
            .await,
    );
    let id = created["webhook_id"].as_str().unwrap().to_string();
    assert_eq!(created["has_secret"], true);
    assert!(created.get("secret").is_none());

    let listed = ok_json(h.registry.execute("list_webhooks", json!({})).await);
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["supported_events"].as_array().unwrap().len(), 5);

    let updated = ok_json(
        h.registry
            .execute("update_webhook", json!({"webhook_id": id, "active": false, "events": ["job_started"]}))
            .await,
    );
    assert_eq!(updated["active"], false);
    assert_eq!(updated["events"], json!(["job_started"]));

    assert!(h.registry.execute("update_webhook", json!({"webhook_id": id})).await.is_error());
    assert!(h
        .registry
        .execute("set_webhook", json!({"url": "https://x", "events": ["bogus"]}))
        .await
        .is_error());
    assert!(h.registry.execute("set_webhook", json!({"url": "ftp://x"})).await.is_error());

    let removed = ok_json(h.registry.execute("remove_webhook", json!({"webhook_id": id})).await);
    assert_eq!(removed["success"], true);
    assert!(h.registry.execute("remove_webhook", json!({"webhook_id": id})).await.is_error());
}

#[tokio::test]
async fn generation_notifies_webhooks() {
    let receiver = spawn_mock(Router::new().route("/hook", post(|| async { "ok" }))).await;
    let h = harness().await;
    let created = ok_json(
        h.registry
            .execute("set_webhook", json!({"url": format!("{}/hook", receiver)}))
            .await,
    );
    let id = created["webhook_id"].as_str().unwrap().to_string();

    generate(&h).await;

    let mut entries = Vec::new();
    for _ in 0..50 {
        let log = ok_json(h.registry.execute("get_webhook_log", json!({"webhook_id": id})).await);
        entries = log["entries"].as_array().cloned().unwrap_or_default();
        if entries.len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let events: Vec<&str> = entries.iter().map(|e| e["event"].as_str().unwrap()).collect();
    assert!(events.contains(&"job_started"));
    assert!(events.contains(&"generation_completed"));
    assert!(entries.iter().all(|e| e["success"] == true));

    let capped = ok_json(h.registry.execute("get_webhook_log", json!({"limit": 10_000})).await);
    assert_eq!(capped["filters"]["limit"], 500);
    assert!(h
        .registry
        .execute("get_webhook_log", json!({"event": "nonsense"}))
        .await
        .is_error());
}

#[tokio::test]
async fn failed_run_reports_tool_name() {
    let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
    let sink = seen.clone();
    let receiver = spawn_mock(Router::new().route(
        "/hook",
        post(move |Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(body);
                "ok"
            }
        }),
    ))
    .await;
    let failing = Router::new()
        .route("/system_stats", get(|| async { Json(json!({"devices": []})) }))
        .route(
            "/prompt",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": {"message": "boom"}}))) }),
        );
    let h = harness_with(spawn_mock(failing).await).await;
    ok_json(
        h.registry
            .execute("set_webhook", json!({"url": format!("{}/hook", receiver), "events": ["job_failed"]}))
            .await,
    );

    let run = h
        .registry
        .execute("run_workflow", json!({"workflow_id": "generate_image", "overrides": {"prompt": "x", "model": "m"}}))
        .await;
    assert!(run.is_error());

    let mut delivered = Vec::new();
    for _ in 0..50 {
        delivered = seen.lock().unwrap().clone();
        if !delivered.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0]["event"], "job_failed");
    assert_eq!(delivered[0]["data"]["tool"], "run_workflow");
    assert_eq!(delivered[0]["data"]["workflow_id"], "generate_image");
}

// ===========================================================================
// Credentials
// ===========================================================================

#[tokio::test]
async fn credentials_status_never_leaks_tokens() {
    let h = harness().await;
    h.ctx.credentials.set("hf", "hf_secret_token").unwrap();
    let result = h.registry.execute("credentials_status", json!({})).await;
    assert!(!result.to_content_string().contains("hf_secret_token"));
    let v = ok_json(result);
    assert_eq!(v["services"]["huggingface"]["configured"], true);
    assert_eq!(v["services"]["civitai"]["configured"], false);
}
