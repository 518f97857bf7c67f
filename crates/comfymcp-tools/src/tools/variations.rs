//! generate_variations: img2img re-renders of an existing image asset

use crate::args::{optional_f64, optional_str, optional_u64, optional_usize, required_str};
use crate::context::ToolContext;
use crate::registry::{Tool, ToolResult};
use crate::runner::{self, RunRequest};
use comfymcp_core::Namespace;
use comfymcp_workflow::random_seed;
use serde_json::{json, Value};
use tracing::{info, warn};

pub const MAX_VARIATIONS: usize = 8;

/// Label the variation assets are registered under.
pub const VARIATIONS_WORKFLOW_ID: &str = "image_variations";

const OUTPUT_KEYS: &[&str] = &["images", "image"];

/// Sampler settings shared by every variation in one call.
#[derive(Debug, Clone)]
pub struct VariationSettings {
    pub model: String,
    pub image: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub steps: Value,
    pub cfg: Value,
    pub sampler_name: Value,
    pub scheduler: Value,
    pub denoise: f64,
}

/// Load image -> VAE encode -> KSampler at `denoise` -> decode -> save.
pub fn variation_graph(s: &VariationSettings, seed: u64, index: usize) -> Value {
    json!({
        "1": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": s.model}},
        "2": {"class_type": "LoadImage", "inputs": {"image": s.image, "upload": "image"}},
        "3": {"class_type": "VAEEncode", "inputs": {"pixels": ["2", 0], "vae": ["1", 2]}},
        "4": {"class_type": "CLIPTextEncode", "inputs": {"text": s.prompt, "clip": ["1", 1]}},
        "5": {"class_type": "CLIPTextEncode", "inputs": {"text": s.negative_prompt, "clip": ["1", 1]}},
        "6": {"class_type": "KSampler", "inputs": {
            "seed": seed,
            "steps": s.steps,
            "cfg": s.cfg,
            "sampler_name": s.sampler_name,
            "scheduler": s.scheduler,
            "denoise": s.denoise,
            "model": ["1", 0],
            "positive": ["4", 0],
            "negative": ["5", 0],
            "latent_image": ["3", 0]
        }},
        "7": {"class_type": "VAEDecode", "inputs": {"samples": ["6", 0], "vae": ["1", 2]}},
        "8": {"class_type": "SaveImage", "inputs": {
            "filename_prefix": format!("ComfyUI_Variation_{}", index + 1),
            "images": ["7", 0]
        }}
    })
}

pub struct GenerateVariationsTool {
    ctx: ToolContext,
}

impl GenerateVariationsTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }

    fn image_default(&self, key: &str, fallback: Value) -> Value {
        self.ctx.defaults.get(Namespace::Image, key).unwrap_or(fallback)
    }
}

#[async_trait::async_trait]
impl Tool for GenerateVariationsTool {
    fn name(&self) -> &str {
        "generate_variations"
    }

    fn description(&self) -> &str {
        "Make 1-8 img2img variations of an image asset. variation_strength (0-1) is the denoise amount; each variation uses seed+i."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "asset_id": { "type": "string", "description": "Source image asset" },
                "num_variations": { "type": "integer", "minimum": 1, "maximum": MAX_VARIATIONS, "default": 4 },
                "variation_strength": { "type": "number", "minimum": 0.0, "maximum": 1.0, "default": 0.7 },
                "seed": { "type": "integer", "description": "Base seed (random when omitted)" },
                "prompt": { "type": "string", "description": "Optional guidance prompt" },
                "negative_prompt": { "type": "string" },
                "model": { "type": "string", "description": "Checkpoint (default image model when omitted)" }
            },
            "required": ["asset_id"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let asset_id = match required_str(&args, "asset_id") {
            Ok(id) => id,
            Err(e) => return ToolResult::error(e),
        };
        let count = optional_usize(&args, "num_variations").unwrap_or(4);
        if !(1..=MAX_VARIATIONS).contains(&count) {
            return ToolResult::error(format!("num_variations must be between 1 and {}, got {}", MAX_VARIATIONS, count));
        }
        let strength = optional_f64(&args, "variation_strength").unwrap_or(0.7);
        if !(0.0..=1.0).contains(&strength) {
            return ToolResult::error(format!("variation_strength must be between 0.0 and 1.0, got {}", strength));
        }

        let Some(asset) = self.ctx.assets.get(asset_id) else {
            return ToolResult::error(format!("Asset {} not found or expired. Generate a new asset.", asset_id));
        };
        if !asset.mime_type.starts_with("image/") {
            return ToolResult::error(format!("Asset {} is not an image (mime_type: {})", asset_id, asset.mime_type));
        }

        let model = match optional_str(&args, "model")
            .map(String::from)
            .or_else(|| self.ctx.defaults.get(Namespace::Image, "model").and_then(|v| v.as_str().map(String::from)))
        {
            Some(m) if !m.is_empty() => m,
            _ => return ToolResult::error("No model given and no default image model is set. Pass model or call set_defaults."),
        };

        let bytes = match self.ctx.client.fetch_bytes(&asset.asset_url(self.ctx.assets.base_url())).await {
            Ok(b) => b,
            Err(e) => return ToolResult::error(format!("Failed to fetch source image: {}", e)),
        };
        let prefix: String = asset_id.chars().take(8).collect();
        let upload_name = format!("variation_input_{}.png", prefix);
        let image = match self.ctx.client.upload_image(bytes, &upload_name, &asset.mime_type, true).await {
            Ok(name) => name,
            Err(e) => return ToolResult::error(format!("Failed to upload source image: {}", e)),
        };

        let settings = VariationSettings {
            model: model.clone(),
            image,
            prompt: optional_str(&args, "prompt").unwrap_or("").to_string(),
            negative_prompt: match optional_str(&args, "negative_prompt") {
                Some(text) => text.to_string(),
                None => self
                    .image_default("negative_prompt", json!("text, watermark, blurry"))
                    .as_str()
                    .unwrap_or("")
                    .to_string(),
            },
            steps: self.image_default("steps", json!(20)),
            cfg: self.image_default("cfg", json!(7.0)),
            sampler_name: self.image_default("sampler_name", json!("euler")),
            scheduler: self.image_default("scheduler", json!("normal")),
            denoise: strength,
        };
        let base_seed = optional_u64(&args, "seed").unwrap_or_else(random_seed);
        let preferences: Vec<String> = OUTPUT_KEYS.iter().map(|k| k.to_string()).collect();

        let mut variations = Vec::new();
        let mut warnings = Vec::new();
        for i in 0..count {
            let seed = base_seed.saturating_add(i as u64);
            let graph = variation_graph(&settings, seed, i);
            let req = RunRequest {
                workflow_id: VARIATIONS_WORKFLOW_ID,
                overrides: Default::default(),
                tool_name: Some("generate_variations"),
                return_inline_preview: false,
                session_id: asset.session_id.clone(),
            };
            match runner::run_graph(&self.ctx, &graph, &preferences, req).await {
                Ok(mut result) => {
                    result["variation_index"] = json!(i + 1);
                    result["seed"] = json!(seed);
                    result["variation_strength"] = json!(strength);
                    variations.push(result);
                }
                Err(e) => {
                    warn!("Variation {} of {} failed: {}", i + 1, asset_id, e);
                    warnings.push(format!("Variation {}: {}", i + 1, e));
                }
            }
        }

        if variations.is_empty() {
            return ToolResult::error(format!("Failed to generate any variations: {}", warnings.join("; ")));
        }
        info!("generate_variations {}: {} of {} succeeded", asset_id, variations.len(), count);

        let mut body = json!({
            "variations": variations,
            "count": variations.len(),
            "original_asset_id": asset_id,
            "variation_strength": strength,
            "base_seed": base_seed,
            "prompt": (!settings.prompt.is_empty()).then_some(&settings.prompt),
            "model": model,
        });
        if !warnings.is_empty() {
            body["warnings"] = json!(warnings);
        }
        ToolResult::Json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_wires_denoise_and_seed() {
        let settings = VariationSettings {
            model: "sd15.safetensors".into(),
            image: "in.png".into(),
            prompt: String::new(),
            negative_prompt: "blurry".into(),
            steps: json!(20),
            cfg: json!(7.0),
            sampler_name: json!("euler"),
            scheduler: json!("normal"),
            denoise: 0.4,
        };
        let g = variation_graph(&settings, 77, 2);
        assert_eq!(g["6"]["inputs"]["seed"], 77);
        assert_eq!(g["6"]["inputs"]["denoise"], 0.4);
        assert_eq!(g["2"]["inputs"]["image"], "in.png");
        assert_eq!(g["8"]["inputs"]["filename_prefix"], "ComfyUI_Variation_3");
    }
}
