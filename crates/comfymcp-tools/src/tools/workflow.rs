//! Workflow tools: catalog, generic runner, requirement checks, and one
//! generated tool per placeholder-bearing workflow

use crate::args::{optional_bool, optional_object, optional_str, required_str};
use crate::context::ToolContext;
use crate::registry::{Tool, ToolResult};
use crate::runner::{self, RunRequest};
use comfymcp_workflow::{WorkflowDefinition, WorkflowManager};
use serde_json::{json, Map, Value};

pub struct ListWorkflowsTool {
    ctx: ToolContext,
}

impl ListWorkflowsTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for ListWorkflowsTool {
    fn name(&self) -> &str {
        "list_workflows"
    }

    fn description(&self) -> &str {
        "List available workflows with their ids, descriptions, inputs (type, required, default) and namespace."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> ToolResult {
        let catalog = self.ctx.workflows.catalog();
        ToolResult::Json(json!({
            "workflows": catalog,
            "count": catalog.len(),
            "workflow_dir": self.ctx.workflows.dir().display().to_string(),
        }))
    }
}

pub struct RunWorkflowTool {
    ctx: ToolContext,
}

impl RunWorkflowTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for RunWorkflowTool {
    fn name(&self) -> &str {
        "run_workflow"
    }

    fn description(&self) -> &str {
        "Run a saved workflow by id with parameter overrides. Returns the generated asset's id, URL and metadata."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "workflow_id": {
                    "type": "string",
                    "description": "Workflow id (file stem, e.g. generate_image)"
                },
                "overrides": {
                    "type": "object",
                    "description": "Parameter values keyed by parameter name"
                },
                "return_inline_preview": {
                    "type": "boolean",
                    "description": "Include a downscaled base64 JPEG preview of image outputs",
                    "default": false
                },
                "session_id": {
                    "type": "string",
                    "description": "Optional session tag stored on the asset for list_assets filtering"
                }
            },
            "required": ["workflow_id"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let workflow_id = match required_str(&args, "workflow_id") {
            Ok(id) => id,
            Err(e) => return ToolResult::error(e),
        };
        let req = RunRequest {
            workflow_id,
            overrides: optional_object(&args, "overrides").unwrap_or_default(),
            tool_name: None,
            return_inline_preview: optional_bool(&args, "return_inline_preview").unwrap_or(false),
            session_id: optional_str(&args, "session_id").map(String::from),
        };
        match runner::run(&self.ctx, req).await {
            Ok(v) => ToolResult::Json(v),
            Err(e) => e.into(),
        }
    }
}

pub struct ValidateWorkflowTool {
    ctx: ToolContext,
}

impl ValidateWorkflowTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for ValidateWorkflowTool {
    fn name(&self) -> &str {
        "validate_workflow"
    }

    fn description(&self) -> &str {
        "Check whether a workflow's required nodes, models and VRAM are available on the connected ComfyUI."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "workflow_id": { "type": "string", "description": "Workflow id to check" }
            },
            "required": ["workflow_id"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let workflow_id = match required_str(&args, "workflow_id") {
            Ok(id) => id,
            Err(e) => return ToolResult::error(e),
        };
        match self.ctx.workflows.validate_requirements(workflow_id, &self.ctx.client).await {
            Ok(report) => ToolResult::json(report),
            Err(e) => comfymcp_core::Error::from(e).into(),
        }
    }
}

/// Generated tool for one workflow. Its arguments are the workflow's
/// parameters plus `return_inline_preview`.
pub struct WorkflowTool {
    ctx: ToolContext,
    workflow_id: String,
    tool_name: String,
    description: String,
    schema: Value,
}

impl WorkflowTool {
    pub fn new(ctx: ToolContext, def: &WorkflowDefinition) -> Self {
        let mut schema = WorkflowManager::input_schema(def);
        if let Some(props) = schema.get_mut("properties").and_then(Value::as_object_mut) {
            props.insert(
                "return_inline_preview".into(),
                json!({
                    "type": "boolean",
                    "description": "Include a downscaled base64 JPEG preview of image outputs",
                    "default": false
                }),
            );
        }
        Self {
            ctx,
            workflow_id: def.workflow_id.clone(),
            tool_name: def.tool_name.clone(),
            description: def.description.clone(),
            schema,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }
}

#[async_trait::async_trait]
impl Tool for WorkflowTool {
    fn name(&self) -> &str {
        &self.tool_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let mut overrides: Map<String, Value> = match args {
            Value::Object(m) => m,
            Value::Null => Map::new(),
            _ => return ToolResult::error("Arguments must be an object"),
        };
        let preview = overrides
            .remove("return_inline_preview")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let req = RunRequest {
            workflow_id: &self.workflow_id,
            overrides,
            tool_name: Some(&self.tool_name),
            return_inline_preview: preview,
            session_id: None,
        };
        match runner::run(&self.ctx, req).await {
            Ok(v) => ToolResult::Json(v),
            Err(e) => e.into(),
        }
    }
}
