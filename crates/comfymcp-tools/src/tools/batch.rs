//! Batch tools: one workflow run per parameter variation or per seed

use crate::args::{optional_object, optional_str, optional_u64, optional_usize, required_str};
use crate::context::ToolContext;
use crate::registry::{Tool, ToolResult};
use crate::runner::{self, RunRequest};
use comfymcp_workflow::{random_seed, WorkflowDefinition};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

pub const MAX_SEED_BATCH: usize = 8;

fn unknown_workflow(ctx: &ToolContext, id: &str) -> ToolResult {
    let mut available: Vec<&str> = ctx.workflows.definitions().map(|d| d.workflow_id.as_str()).collect();
    available.sort_unstable();
    ToolResult::error(format!("Workflow '{}' not found. Available: {}", id, available.join(", ")))
}

fn has_seed(def: &WorkflowDefinition) -> bool {
    def.parameter("seed").is_some()
}

/// Summary shared by both batch tools.
fn batch_summary(results: Vec<Value>, errors: Vec<Value>, requested: usize) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("total_requested".into(), json!(requested));
    body.insert("successful".into(), json!(results.len()));
    body.insert("failed".into(), json!(errors.len()));
    body.insert("results".into(), Value::Array(results));
    body.insert("errors".into(), if errors.is_empty() { Value::Null } else { Value::Array(errors) });
    body
}

// ---------------------------------------------------------------------------
// batch_generate
// ---------------------------------------------------------------------------

pub struct BatchGenerateTool {
    ctx: ToolContext,
}

impl BatchGenerateTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for BatchGenerateTool {
    fn name(&self) -> &str {
        "batch_generate"
    }

    fn description(&self) -> &str {
        "Run one workflow several times: base_params merged with each entry of variations. Items run in order; failures are reported per item."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "workflow_id": { "type": "string", "description": "Workflow id or its tool name" },
                "base_params": { "type": "object", "description": "Parameters applied to every run" },
                "variations": {
                    "type": "array",
                    "items": { "type": "object" },
                    "description": "Per-run overrides, one object per run"
                },
                "common_seed": { "type": "integer", "description": "Use this seed for every run" },
                "session_id": { "type": "string" }
            },
            "required": ["workflow_id", "variations"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let requested = match required_str(&args, "workflow_id") {
            Ok(id) => id,
            Err(e) => return ToolResult::error(e),
        };
        let Some(def) = self.ctx.workflows.find(requested) else {
            return unknown_workflow(&self.ctx, requested);
        };
        let variations: Vec<Map<String, Value>> = match args.get("variations").and_then(Value::as_array) {
            Some(items) if !items.is_empty() => {
                match items.iter().map(|v| v.as_object().cloned()).collect::<Option<Vec<_>>>() {
                    Some(v) => v,
                    None => return ToolResult::error("Each entry of variations must be an object"),
                }
            }
            _ => return ToolResult::error("variations must be a non-empty array of parameter objects"),
        };
        let base = optional_object(&args, "base_params").unwrap_or_default();
        let common_seed = optional_u64(&args, "common_seed");
        let session_id = optional_str(&args, "session_id").map(String::from);

        let mut results = Vec::new();
        let mut errors = Vec::new();
        for (i, variation) in variations.into_iter().enumerate() {
            let mut params = base.clone();
            params.extend(variation);
            if has_seed(def) {
                match common_seed {
                    Some(seed) => {
                        params.insert("seed".into(), json!(seed));
                    }
                    None => {
                        params.entry("seed").or_insert_with(|| json!(random_seed()));
                    }
                }
            }

            let tool = format!("batch_generate[{}]", i);
            let req = RunRequest {
                workflow_id: &def.workflow_id,
                overrides: params.clone(),
                tool_name: Some(&tool),
                return_inline_preview: false,
                session_id: session_id.clone(),
            };
            match runner::run(&self.ctx, req).await {
                Ok(result) => results.push(json!({ "index": i, "params": params, "result": result })),
                Err(e) => {
                    warn!("Batch item {} of {} failed: {}", i, def.workflow_id, e);
                    errors.push(json!({ "index": i, "params": params, "error": e.to_string() }));
                }
            }
        }

        let requested_count = results.len() + errors.len();
        info!("batch_generate {}: {} ok, {} failed", def.workflow_id, results.len(), errors.len());
        let mut body = batch_summary(results, errors, requested_count);
        body.insert("workflow_id".into(), json!(def.workflow_id));
        ToolResult::Json(Value::Object(body))
    }
}

// ---------------------------------------------------------------------------
// batch_generate_seeds
// ---------------------------------------------------------------------------

pub struct BatchGenerateSeedsTool {
    ctx: ToolContext,
}

impl BatchGenerateSeedsTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for BatchGenerateSeedsTool {
    fn name(&self) -> &str {
        "batch_generate_seeds"
    }

    fn description(&self) -> &str {
        "Run one workflow with the same parameters and different seeds (1-8 runs). Seeds count up from start_seed, or are random."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "workflow_id": { "type": "string", "description": "Workflow id or its tool name" },
                "params": { "type": "object", "description": "Parameters for every run" },
                "count": { "type": "integer", "minimum": 1, "maximum": MAX_SEED_BATCH, "default": 4 },
                "start_seed": { "type": "integer", "description": "First seed; later runs use start_seed+1, +2, ..." },
                "session_id": { "type": "string" }
            },
            "required": ["workflow_id"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let requested = match required_str(&args, "workflow_id") {
            Ok(id) => id,
            Err(e) => return ToolResult::error(e),
        };
        let Some(def) = self.ctx.workflows.find(requested) else {
            return unknown_workflow(&self.ctx, requested);
        };
        if !has_seed(def) {
            return ToolResult::error(format!("Workflow '{}' has no seed parameter", def.workflow_id));
        }
        let params = optional_object(&args, "params").unwrap_or_default();
        let count = optional_usize(&args, "count").unwrap_or(4).clamp(1, MAX_SEED_BATCH);
        let seeds: Vec<u64> = match optional_u64(&args, "start_seed") {
            Some(start) => (0..count as u64).map(|i| start.saturating_add(i)).collect(),
            None => (0..count).map(|_| random_seed()).collect(),
        };
        let session_id = optional_str(&args, "session_id").map(String::from);

        let mut results = Vec::new();
        let mut errors = Vec::new();
        for (i, seed) in seeds.iter().copied().enumerate() {
            let mut overrides = params.clone();
            overrides.insert("seed".into(), json!(seed));
            let tool = format!("batch_seeds[{}]", i);
            let req = RunRequest {
                workflow_id: &def.workflow_id,
                overrides,
                tool_name: Some(&tool),
                return_inline_preview: false,
                session_id: session_id.clone(),
            };
            match runner::run(&self.ctx, req).await {
                Ok(result) => results.push(json!({ "index": i, "seed": seed, "result": result })),
                Err(e) => {
                    warn!("Seed {} of {} failed: {}", seed, def.workflow_id, e);
                    errors.push(json!({ "index": i, "seed": seed, "error": e.to_string() }));
                }
            }
        }

        let mut body = batch_summary(results, errors, count);
        body.insert("workflow_id".into(), json!(def.workflow_id));
        body.insert("params".into(), Value::Object(params));
        body.insert("seeds_used".into(), json!(seeds));
        ToolResult::Json(Value::Object(body))
    }
}
