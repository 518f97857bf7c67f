//! Publish tools: copy assets into a web project's static directory

use crate::args::{optional_str, required_str};
use crate::context::ToolContext;
use crate::registry::{Tool, ToolResult};
use comfymcp_assets::PublishError;
use serde_json::{json, Value};
use std::path::Path;

pub struct PublishAssetTool {
    ctx: ToolContext,
}

impl PublishAssetTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for PublishAssetTool {
    fn name(&self) -> &str {
        "publish_asset"
    }

    fn description(&self) -> &str {
        "Copy a generated asset into the project's publish directory. Give target_filename, or a manifest_key to derive the name and record it in manifest.json."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "asset_id": { "type": "string" },
                "target_filename": {
                    "type": "string",
                    "description": "Lowercase filename with a media extension matching the source, e.g. hero.png"
                },
                "manifest_key": {
                    "type": "string",
                    "description": "Key recorded in manifest.json, e.g. hero"
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
        let Some(record) = self.ctx.assets.get(asset_id) else {
            return ToolResult::error(format!("Asset {} not found or expired", asset_id));
        };
        let target = optional_str(&args, "target_filename");
        let key = optional_str(&args, "manifest_key");

        let local = self
            .ctx
            .assets
            .local_path(asset_id, self.ctx.config.output_root.as_deref());
        let result = match local {
            Some(path) => self.ctx.publisher.publish(&record, &path, target, key),
            None => {
                let url = record.asset_url(self.ctx.assets.base_url());
                match self.ctx.client.fetch_bytes(&url).await {
                    Ok(bytes) => self.ctx.publisher.publish_bytes(&record, &bytes, target, key),
                    Err(e) => return ToolResult::error(format!("Failed to fetch asset {}: {}", asset_id, e)),
                }
            }
        };

        match result {
            Ok(published) => {
                self.ctx.webhooks.dispatch(
                    "asset_published",
                    json!({
                        "asset_id": asset_id,
                        "dest_path": published.dest_path.display().to_string(),
                        "filename": published.filename,
                        "manifest_key": published.manifest_key,
                        "bytes": published.bytes,
                    }),
                );
                ToolResult::json(published)
            }
            Err(e) => publish_error(e),
        }
    }
}

fn publish_error(e: PublishError) -> ToolResult {
    comfymcp_core::Error::from(e).into()
}

pub struct GetPublishInfoTool {
    ctx: ToolContext,
}

impl GetPublishInfoTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for GetPublishInfoTool {
    fn name(&self) -> &str {
        "get_publish_info"
    }

    fn description(&self) -> &str {
        "Show the publish directory, how it was chosen, whether it is writable, and the current manifest."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> ToolResult {
        ToolResult::json(self.ctx.publisher.info())
    }
}

pub struct SetPublishDirTool {
    ctx: ToolContext,
}

impl SetPublishDirTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for SetPublishDirTool {
    fn name(&self) -> &str {
        "set_publish_dir"
    }

    fn description(&self) -> &str {
        "Set the directory publish_asset writes into. The directory is created if missing."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Absolute path, or ~/ relative to home" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let raw = match required_str(&args, "path") {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let path = comfymcp_core::config::expand_tilde(raw);
        if !Path::new(&path).is_absolute() {
            return ToolResult::error(format!("Publish directory must be absolute: {}", raw));
        }
        match self.ctx.publisher.set_root(&path) {
            Ok(root) => ToolResult::Json(json!({
                "success": true,
                "publish_root": root.display().to_string(),
            })),
            Err(e) => publish_error(e),
        }
    }
}
