//! Configuration tools: health, models, and per-namespace defaults

use crate::args::optional_bool;
use crate::context::ToolContext;
use crate::registry::{Tool, ToolResult};
use comfymcp_core::Namespace;
use serde_json::{json, Map, Value};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub struct HealthCheckTool {
    ctx: ToolContext,
}

impl HealthCheckTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for HealthCheckTool {
    fn name(&self) -> &str {
        "health_check"
    }

    fn description(&self) -> &str {
        "Diagnose the server: ComfyUI connectivity and VRAM, available models, discovered workflows, invalid default models."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> ToolResult {
        let mut issues: Vec<String> = Vec::new();
        let conn = self.ctx.client.check_connection().await;

        let mut comfyui = json!({ "connected": conn.connected, "url": self.ctx.client.base_url() });
        if !conn.connected {
            issues.push(format!(
                "ComfyUI not reachable: {}",
                conn.error.as_deref().unwrap_or("unknown error")
            ));
        } else if let (Some(total), Some(free)) = (conn.vram_total, conn.vram_free) {
            if total > 0 {
                comfyui["vram_total_gb"] = json!(round2(total as f64 / GIB));
                comfyui["vram_free_gb"] = json!(round2(free as f64 / GIB));
                comfyui["vram_used_pct"] = json!(((1.0 - free as f64 / total as f64) * 1000.0).round() / 10.0);
                if (free as f64) < 2.0 * GIB {
                    issues.push("Low VRAM: less than 2GB free. Large models may fail.".into());
                }
            }
        }

        let models = self.ctx.client.available_models();
        if models.is_empty() {
            issues.push("No checkpoint models found in ComfyUI".into());
        }

        let tools: Vec<&str> = self
            .ctx
            .workflows
            .definitions()
            .filter(|d| d.has_placeholders())
            .map(|d| d.tool_name.as_str())
            .collect();
        if tools.is_empty() {
            issues.push("No workflows found. Add JSON files with PARAM_* placeholders to the workflow directory.".into());
        }

        let invalid = self.ctx.defaults.invalid_models();
        for (ns, model) in &invalid {
            issues.push(format!("Default {} model '{}' is not installed in ComfyUI", ns, model));
        }

        let status = if !conn.connected {
            "unhealthy"
        } else if !issues.is_empty() {
            "degraded"
        } else {
            "healthy"
        };

        ToolResult::Json(json!({
            "status": status,
            "issues": issues,
            "comfyui": comfyui,
            "models": {
                "count": models.len(),
                "available": models.iter().take(10).collect::<Vec<_>>(),
            },
            "workflows": { "count": tools.len(), "available": tools },
            "invalid_default_models": invalid,
        }))
    }
}

pub struct ListModelsTool {
    ctx: ToolContext,
}

impl ListModelsTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for ListModelsTool {
    fn name(&self) -> &str {
        "list_models"
    }

    fn description(&self) -> &str {
        "Checkpoint models available in ComfyUI, and the current default image model."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "refresh": { "type": "boolean", "description": "Re-query ComfyUI first", "default": false }
            }
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let models = if optional_bool(&args, "refresh").unwrap_or(false) {
            self.ctx.client.refresh_models().await
        } else {
            self.ctx.client.available_models()
        };
        ToolResult::Json(json!({
            "models": models,
            "count": models.len(),
            "default": self.ctx.defaults.get(Namespace::Image, "model"),
        }))
    }
}

pub struct GetDefaultsTool {
    ctx: ToolContext,
}

impl GetDefaultsTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for GetDefaultsTool {
    fn name(&self) -> &str {
        "get_defaults"
    }

    fn description(&self) -> &str {
        "Effective defaults per namespace (image, audio, video, 3d), merged from runtime, config, env and built-in values."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> ToolResult {
        ToolResult::json(self.ctx.defaults.all())
    }
}

pub struct SetDefaultsTool {
    ctx: ToolContext,
}

impl SetDefaultsTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for SetDefaultsTool {
    fn name(&self) -> &str {
        "set_defaults"
    }

    fn description(&self) -> &str {
        "Set runtime defaults for any of image, audio, video, 3d. A model must exist in ComfyUI. With persist=true the values are also written to the config file."
    }

    fn input_schema(&self) -> Value {
        let mut props = Map::new();
        for ns in Namespace::ALL {
            props.insert(
                ns.as_str().to_string(),
                json!({ "type": "object", "description": format!("Defaults for the {} namespace", ns) }),
            );
        }
        props.insert("persist".into(), json!({ "type": "boolean", "default": false }));
        json!({ "type": "object", "properties": props })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let persist = optional_bool(&args, "persist").unwrap_or(false);
        let available = self.ctx.client.available_models();

        let mut updated = Map::new();
        let mut errors = Vec::new();
        for ns in Namespace::ALL {
            let Some(values) = args.get(ns.as_str()).and_then(Value::as_object) else {
                continue;
            };
            if values.is_empty() {
                continue;
            }
            match self.ctx.defaults.set(ns, values.clone(), &available) {
                Ok(applied) => {
                    if persist {
                        if let Err(e) = self.ctx.defaults.persist(ns, &applied) {
                            errors.push(format!("Failed to persist {} defaults: {}", ns, e));
                        }
                    }
                    updated.insert(ns.to_string(), Value::Object(applied));
                }
                Err(e) => errors.push(format!("{}: {}", ns, e)),
            }
        }

        if !errors.is_empty() {
            let applied: Vec<&String> = updated.keys().collect();
            return ToolResult::error(format!("{} (applied: {:?})", errors.join("; "), applied));
        }
        if updated.is_empty() {
            return ToolResult::error("Nothing to update: pass at least one of image, audio, video, 3d");
        }
        ToolResult::Json(json!({ "success": true, "updated": updated, "persisted": persist }))
    }
}
