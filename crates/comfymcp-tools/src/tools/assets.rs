//! Asset tools: inline viewing, listing, metadata, chaining into the next
//! workflow, and local file lookup

use crate::args::{optional_str, optional_usize, required_str};
use crate::context::ToolContext;
use crate::registry::{Tool, ToolResult};
use crate::runner::{INLINE_IMAGE_TYPES, MAX_INLINE_B64_CHARS};
use comfymcp_assets::preview::{encode_preview, DEFAULT_MAX_DIM};
use comfymcp_assets::{AssetRecord, AssetRegistry};
use comfymcp_core::ToolContent;
use serde_json::{json, Value};
use tracing::{info, warn};

fn not_found(asset_id: &str) -> ToolResult {
    ToolResult::error(format!(
        "Asset {} not found or expired (registry is in-memory and resets on restart). Generate a new asset.",
        asset_id
    ))
}

/// Summary view used by metadata mode and list_assets.
pub fn asset_summary(record: &AssetRecord, registry: &AssetRegistry) -> Value {
    json!({
        "asset_id": record.asset_id,
        "asset_url": record.asset_url(registry.base_url()),
        "filename": record.filename,
        "subfolder": record.subfolder,
        "folder_type": record.folder_type,
        "mime_type": record.mime_type,
        "width": record.width,
        "height": record.height,
        "bytes_size": record.bytes_size,
        "workflow_id": record.workflow_id,
        "prompt_id": record.prompt_id,
        "session_id": record.session_id,
        "created_at": record.created_at.to_rfc3339(),
        "expires_at": record.expires_at.to_rfc3339(),
    })
}

// ---------------------------------------------------------------------------
// view_image
// ---------------------------------------------------------------------------

pub struct ViewImageTool {
    ctx: ToolContext,
}

impl ViewImageTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for ViewImageTool {
    fn name(&self) -> &str {
        "view_image"
    }

    fn description(&self) -> &str {
        "View a generated image inline (mode=thumb) or get its metadata (mode=metadata). Thumbnails are downscaled JPEG previews; images that cannot fit the inline budget are described instead of shown."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "asset_id": { "type": "string", "description": "Asset id returned by a generation tool" },
                "mode": {
                    "type": "string",
                    "enum": ["thumb", "metadata"],
                    "default": "thumb"
                },
                "max_dim": {
                    "type": "integer",
                    "description": "Longest side of the thumbnail in pixels (default 512)"
                },
                "max_b64_chars": {
                    "type": "integer",
                    "description": "Maximum base64 characters to inline (default 100000)"
                }
            },
            "required": ["asset_id"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let asset_id = match required_str(&args, "asset_id") {
            Ok(id) => id,
            Err(e) => return ToolResult::error(e),
        };
        self.ctx.assets.cleanup_expired();
        let Some(record) = self.ctx.assets.get(asset_id) else {
            return not_found(asset_id);
        };

        let mode = optional_str(&args, "mode").unwrap_or("thumb");
        match mode {
            "metadata" => return ToolResult::Json(asset_summary(&record, &self.ctx.assets)),
            "thumb" => {}
            other => {
                return ToolResult::error(format!("Mode '{}' not supported. Use 'thumb' or 'metadata'.", other))
            }
        }

        if !INLINE_IMAGE_TYPES.contains(&record.mime_type.as_str()) {
            return ToolResult::error(format!(
                "Asset type '{}' not supported for inline viewing. Supported types: {}",
                record.mime_type,
                INLINE_IMAGE_TYPES.join(", ")
            ));
        }

        let budget = optional_usize(&args, "max_b64_chars").unwrap_or(MAX_INLINE_B64_CHARS);
        let max_dim = optional_usize(&args, "max_dim")
            .map(|d| d.clamp(1, DEFAULT_MAX_DIM as usize) as u32)
            .unwrap_or(DEFAULT_MAX_DIM);
        let url = record.asset_url(self.ctx.assets.base_url());
        let bytes = match self.ctx.client.fetch_bytes(&url).await {
            Ok(b) => b,
            Err(e) => return ToolResult::error(format!("Failed to fetch asset: {}", e)),
        };

        match encode_preview(&bytes, max_dim, budget) {
            Ok(preview) => {
                info!(
                    "view_image {}: src={}B {}x{} preview={}x{} encoded={}B b64_chars={}",
                    asset_id,
                    bytes.len(),
                    dim(record.width),
                    dim(record.height),
                    preview.width,
                    preview.height,
                    preview.bytes_len,
                    preview.data.len()
                );
                ToolResult::Content(vec![ToolContent::Image {
                    data: preview.data,
                    mime_type: preview.mime_type.to_string(),
                }])
            }
            Err(e) => {
                warn!("Refusing to inline {}: {}", asset_id, e);
                ToolResult::text(format!(
                    "Could not inline image ({}). Asset ID: {}. URL: {}. \
                     Source size: {} bytes. Source dimensions: {}x{}. Hint: open the URL locally or use metadata mode.",
                    e,
                    asset_id,
                    url,
                    bytes.len(),
                    dim(record.width),
                    dim(record.height),
                ))
            }
        }
    }
}

fn dim(v: Option<u32>) -> String {
    v.map(|n| n.to_string()).unwrap_or_else(|| "?".into())
}

// ---------------------------------------------------------------------------
// list_assets / get_asset_metadata
// ---------------------------------------------------------------------------

pub struct ListAssetsTool {
    ctx: ToolContext,
}

impl ListAssetsTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for ListAssetsTool {
    fn name(&self) -> &str {
        "list_assets"
    }

    fn description(&self) -> &str {
        "List recently generated assets, newest first. Optionally filter by workflow_id or session_id."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "default": 10 },
                "workflow_id": { "type": "string" },
                "session_id": { "type": "string" }
            }
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let limit = optional_usize(&args, "limit").unwrap_or(10);
        let records = self.ctx.assets.list(
            limit,
            optional_str(&args, "workflow_id"),
            optional_str(&args, "session_id"),
        );
        let assets: Vec<Value> = records.iter().map(|r| asset_summary(r, &self.ctx.assets)).collect();
        ToolResult::Json(json!({ "assets": assets, "count": assets.len() }))
    }
}

pub struct GetAssetMetadataTool {
    ctx: ToolContext,
}

impl GetAssetMetadataTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for GetAssetMetadataTool {
    fn name(&self) -> &str {
        "get_asset_metadata"
    }

    fn description(&self) -> &str {
        "Full provenance of an asset, including the submitted workflow and ComfyUI history."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "asset_id": { "type": "string" } },
            "required": ["asset_id"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let asset_id = match required_str(&args, "asset_id") {
            Ok(id) => id,
            Err(e) => return ToolResult::error(e),
        };
        let Some(record) = self.ctx.assets.get(asset_id) else {
            return not_found(asset_id);
        };
        let mut value = match serde_json::to_value(&record) {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        value["asset_url"] = json!(record.asset_url(self.ctx.assets.base_url()));
        ToolResult::Json(value)
    }
}

// ---------------------------------------------------------------------------
// resolve_asset / get_asset_local_path
// ---------------------------------------------------------------------------

pub struct ResolveAssetTool {
    ctx: ToolContext,
}

impl ResolveAssetTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for ResolveAssetTool {
    fn name(&self) -> &str {
        "resolve_asset"
    }

    fn description(&self) -> &str {
        "Make a generated asset usable as an input of the next workflow. Media is uploaded to ComfyUI's input folder; the returned input_filename goes into the next tool's image/video/audio parameter."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "asset_id": { "type": "string" } },
            "required": ["asset_id"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let asset_id = match required_str(&args, "asset_id") {
            Ok(id) => id,
            Err(e) => return ToolResult::error(e),
        };
        let Some(record) = self.ctx.assets.get(asset_id) else {
            return not_found(asset_id);
        };

        let uploadable = ["image/", "video/", "audio/"]
            .iter()
            .any(|p| record.mime_type.starts_with(p));
        let input_filename = if uploadable {
            let url = record.asset_url(self.ctx.assets.base_url());
            let bytes = match self.ctx.client.fetch_bytes(&url).await {
                Ok(b) => b,
                Err(e) => return ToolResult::error(format!("Failed to resolve asset {}: {}", asset_id, e)),
            };
            match self
                .ctx
                .client
                .upload_image(bytes, &record.filename, &record.mime_type, true)
                .await
            {
                Ok(name) => name,
                Err(e) => return ToolResult::error(format!("Failed to resolve asset {}: {}", asset_id, e)),
            }
        } else {
            record.filename.clone()
        };

        ToolResult::Json(json!({
            "input_filename": input_filename,
            "asset_id": asset_id,
            "original_filename": record.filename,
            "mime_type": record.mime_type,
            "workflow_id": record.workflow_id,
            "hint": format!(
                "Use '{}' as the image_path or similar input parameter in your next workflow tool call.",
                input_filename
            ),
        }))
    }
}

pub struct GetAssetLocalPathTool {
    ctx: ToolContext,
}

impl GetAssetLocalPathTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for GetAssetLocalPathTool {
    fn name(&self) -> &str {
        "get_asset_local_path"
    }

    fn description(&self) -> &str {
        "Local filesystem path of an asset, for handing to external tools."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "asset_id": { "type": "string" } },
            "required": ["asset_id"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let asset_id = match required_str(&args, "asset_id") {
            Ok(id) => id,
            Err(e) => return ToolResult::error(e),
        };
        let Some(record) = self.ctx.assets.get(asset_id) else {
            return not_found(asset_id);
        };
        match self.ctx.assets.local_path(asset_id, self.ctx.config.output_root.as_deref()) {
            Some(path) => ToolResult::Json(json!({
                "local_path": path.display().to_string(),
                "asset_id": asset_id,
                "filename": record.filename,
                "mime_type": record.mime_type,
            })),
            None => ToolResult::error(format!(
                "Could not resolve local path for asset {}. Set COMFYUI_OUTPUT_ROOT to the ComfyUI output directory. URL: {}",
                asset_id,
                record.asset_url(self.ctx.assets.base_url())
            )),
        }
    }
}
