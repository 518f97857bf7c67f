//! Model management tools: loader-node model lists, sampler and scheduler
//! names, and re-reading the checkpoint cache

use crate::context::ToolContext;
use crate::registry::{Tool, ToolResult};
use comfymcp_client::comfyui::model_list_from_object_info;
use serde_json::{json, Value};
use tracing::info;

/// One listing: which node input to read from `/object_info` and the key the
/// names are returned under.
pub struct Listing {
    pub tool_name: &'static str,
    pub description: &'static str,
    pub node_class: &'static str,
    pub input: &'static str,
    pub key: &'static str,
}

pub const LISTINGS: &[Listing] = &[
    Listing {
        tool_name: "list_loras",
        description: "LoRA models available in ComfyUI (models/loras), for workflows with a LoRA loader.",
        node_class: "LoraLoader",
        input: "lora_name",
        key: "loras",
    },
    Listing {
        tool_name: "list_controlnet_models",
        description: "ControlNet models available in ComfyUI (models/controlnet).",
        node_class: "ControlNetLoader",
        input: "control_net_name",
        key: "controlnet_models",
    },
    Listing {
        tool_name: "list_vae_models",
        description: "VAE models available in ComfyUI (models/vae). Most checkpoints bundle their own VAE.",
        node_class: "VAELoader",
        input: "vae_name",
        key: "vae_models",
    },
    Listing {
        tool_name: "list_upscale_models",
        description: "Upscale models available in ComfyUI (models/upscale_models).",
        node_class: "UpscaleModelLoader",
        input: "model_name",
        key: "upscale_models",
    },
    Listing {
        tool_name: "list_samplers",
        description: "Sampler names accepted as `sampler_name` (e.g. euler, dpmpp_2m, ddim).",
        node_class: "KSampler",
        input: "sampler_name",
        key: "samplers",
    },
    Listing {
        tool_name: "list_schedulers",
        description: "Noise scheduler names accepted as `scheduler` (e.g. normal, karras, exponential, simple).",
        node_class: "KSampler",
        input: "scheduler",
        key: "schedulers",
    },
];

pub struct ListNodeOptionsTool {
    ctx: ToolContext,
    listing: &'static Listing,
}

impl ListNodeOptionsTool {
    pub fn new(ctx: ToolContext, listing: &'static Listing) -> Self {
        Self { ctx, listing }
    }
}

#[async_trait::async_trait]
impl Tool for ListNodeOptionsTool {
    fn name(&self) -> &str {
        self.listing.tool_name
    }

    fn description(&self) -> &str {
        self.listing.description
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> ToolResult {
        let Listing { node_class, input, key, .. } = *self.listing;
        match self.ctx.client.object_info(Some(node_class)).await {
            Ok(info) => {
                let names = model_list_from_object_info(&info, node_class, input);
                let mut body = serde_json::Map::new();
                body.insert("count".into(), json!(names.len()));
                body.insert(key.into(), json!(names));
                ToolResult::Json(Value::Object(body))
            }
            Err(e) => ToolResult::error(format!("Failed to read {}.{} from ComfyUI: {}", node_class, input, e)),
        }
    }
}

pub struct RefreshModelCacheTool {
    ctx: ToolContext,
}

impl RefreshModelCacheTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for RefreshModelCacheTool {
    fn name(&self) -> &str {
        "refresh_model_cache"
    }

    fn description(&self) -> &str {
        "Re-read the checkpoint list from ComfyUI after installing models, and re-check default models against it."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> ToolResult {
        let models = self.ctx.client.refresh_models().await;
        let invalid = self.ctx.defaults.validate_models(&models);
        info!("Model cache refreshed: {} checkpoints, {} invalid defaults", models.len(), invalid.len());
        ToolResult::Json(json!({
            "success": true,
            "checkpoint_count": models.len(),
            "invalid_defaults": self.ctx.defaults.invalid_models(),
        }))
    }
}
