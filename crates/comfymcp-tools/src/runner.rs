//! Workflow execution pipeline shared by `run_workflow` and per-workflow tools
//!
//! render -> job_started -> execute -> register asset -> generation_completed
//! (or job_failed on any execution error).

use crate::context::ToolContext;
use comfymcp_assets::preview::{encode_preview, image_dimensions, DEFAULT_MAX_DIM};
use comfymcp_assets::{AssetRecord, NewAsset};
use comfymcp_core::Error;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

/// Base64 character budget for inline previews.
pub const MAX_INLINE_B64_CHARS: usize = 100_000;

/// Image MIME types that may be shown inline.
pub const INLINE_IMAGE_TYPES: &[&str] = &["image/png", "image/jpeg", "image/jpg", "image/webp", "image/gif"];

pub struct RunRequest<'a> {
    pub workflow_id: &'a str,
    pub overrides: Map<String, Value>,
    pub tool_name: Option<&'a str>,
    pub return_inline_preview: bool,
    pub session_id: Option<String>,
}

/// Render a saved workflow with the request's overrides and execute it.
pub async fn run(ctx: &ToolContext, req: RunRequest<'_>) -> Result<Value, Error> {
    let rendered = ctx.workflows.render(req.workflow_id, &req.overrides, &ctx.defaults)?;
    let preferences = ctx
        .workflows
        .definition(req.workflow_id)
        .map(|d| d.output_preferences.clone())
        .unwrap_or_default();
    run_graph(ctx, &rendered, &preferences, req).await
}

/// Execute an already concrete graph. `req.workflow_id` labels the asset and
/// the webhook payloads; `req.overrides` is ignored.
pub async fn run_graph(
    ctx: &ToolContext,
    rendered: &Value,
    preferences: &[String],
    req: RunRequest<'_>,
) -> Result<Value, Error> {
    let id = req.workflow_id;
    let tool = req.tool_name.unwrap_or("run_workflow");

    ctx.webhooks.dispatch(
        "job_started",
        json!({ "workflow_id": id, "tool": tool }),
    );
    info!("Running workflow {}", id);

    let output = match ctx.client.run_workflow(rendered, preferences).await {
        Ok(output) => output,
        Err(e) => {
            warn!("Workflow {} failed: {}", id, e);
            ctx.webhooks.dispatch(
                "job_failed",
                json!({ "workflow_id": id, "tool": tool, "error": e.to_string() }),
            );
            return Err(e.into());
        }
    };

    let (mut width, mut height, mut bytes_size) = (output.width, output.height, output.bytes_size);
    let mut fetched = None;
    let is_image = output.mime_type.as_deref().is_some_and(|m| m.starts_with("image/"));
    if is_image && (width.is_none() || height.is_none()) {
        match ctx.client.fetch_bytes(&output.asset_url).await {
            Ok(bytes) => {
                if let Some((w, h)) = image_dimensions(&bytes) {
                    width = Some(w);
                    height = Some(h);
                }
                bytes_size.get_or_insert(bytes.len() as u64);
                fetched = Some(bytes);
            }
            Err(e) => debug!("Could not read dimensions of {}: {}", output.filename, e),
        }
    }

    let mut metadata = Map::new();
    if let Some(tool) = req.tool_name {
        metadata.insert("tool".into(), json!(tool));
    }
    let record = ctx.assets.register(NewAsset {
        filename: output.filename,
        subfolder: output.subfolder,
        folder_type: output.folder_type,
        workflow_id: id.to_string(),
        prompt_id: output.prompt_id,
        mime_type: output.mime_type,
        width,
        height,
        bytes_size,
        comfy_history: output.history,
        submitted_workflow: Some(output.submitted_workflow),
        metadata,
        session_id: req.session_id,
    });
    let asset_url = record.asset_url(ctx.assets.base_url());

    ctx.webhooks.dispatch(
        "generation_completed",
        json!({
            "tool": tool,
            "workflow_id": id,
            "asset_id": record.asset_id,
            "asset_url": asset_url,
            "prompt_id": record.prompt_id,
            "filename": record.filename,
            "mime_type": record.mime_type,
        }),
    );

    let mut response = asset_response(&record, &asset_url);
    if let Some(tool) = req.tool_name {
        response["tool"] = json!(tool);
    }
    if req.return_inline_preview {
        attach_preview(ctx, &record, &asset_url, fetched, &mut response).await;
    }
    Ok(response)
}

/// Response body describing a freshly registered asset.
pub fn asset_response(record: &AssetRecord, asset_url: &str) -> Value {
    json!({
        "asset_id": record.asset_id,
        "asset_url": asset_url,
        "filename": record.filename,
        "mime_type": record.mime_type,
        "width": record.width,
        "height": record.height,
        "bytes_size": record.bytes_size,
        "prompt_id": record.prompt_id,
        "workflow_id": record.workflow_id,
        "expires_at": record.expires_at.to_rfc3339(),
    })
}

async fn attach_preview(
    ctx: &ToolContext,
    record: &AssetRecord,
    asset_url: &str,
    fetched: Option<Vec<u8>>,
    response: &mut Value,
) {
    if !INLINE_IMAGE_TYPES.contains(&record.mime_type.as_str()) {
        response["inline_preview_skipped"] = json!(format!("{} is not an inline image type", record.mime_type));
        return;
    }
    let bytes = match fetched {
        Some(bytes) => bytes,
        None => match ctx.client.fetch_bytes(asset_url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Inline preview fetch failed for {}: {}", record.asset_id, e);
                response["inline_preview_skipped"] = json!(e.to_string());
                return;
            }
        },
    };
    match encode_preview(&bytes, DEFAULT_MAX_DIM, MAX_INLINE_B64_CHARS) {
        Ok(preview) => {
            response["inline_preview_base64"] = json!(preview.data);
            response["inline_preview_mime_type"] = json!(preview.mime_type);
            response["inline_preview_size"] = json!([preview.width, preview.height]);
        }
        Err(e) => {
            warn!("Inline preview skipped for {}: {}", record.asset_id, e);
            response["inline_preview_skipped"] = json!(e.to_string());
        }
    }
}
