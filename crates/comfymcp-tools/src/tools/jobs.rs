//! Job tools: queue inspection, status and cancellation

use crate::args::required_str;
use crate::context::ToolContext;
use crate::registry::{Tool, ToolResult};
use serde_json::{json, Value};

pub struct GetQueueStatusTool {
    ctx: ToolContext,
}

impl GetQueueStatusTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for GetQueueStatusTool {
    fn name(&self) -> &str {
        "get_queue_status"
    }

    fn description(&self) -> &str {
        "Running and pending prompts in the ComfyUI queue."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> ToolResult {
        match self.ctx.client.queue_info().await {
            Ok(info) => ToolResult::json(info),
            Err(e) => ToolResult::error(format!("Failed to get queue: {}", e)),
        }
    }
}

pub struct GetJobTool {
    ctx: ToolContext,
}

impl GetJobTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for GetJobTool {
    fn name(&self) -> &str {
        "get_job"
    }

    fn description(&self) -> &str {
        "Status of a prompt: pending, running, completed (with output paths) or error."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "prompt_id": { "type": "string" } },
            "required": ["prompt_id"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let prompt_id = match required_str(&args, "prompt_id") {
            Ok(id) => id,
            Err(e) => return ToolResult::error(e),
        };
        let status = self.ctx.client.job_status(prompt_id).await;
        let mut value = match serde_json::to_value(&status) {
            Ok(v) => v,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        value["prompt_id"] = json!(prompt_id);
        ToolResult::Json(value)
    }
}

pub struct CancelJobTool {
    ctx: ToolContext,
}

impl CancelJobTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for CancelJobTool {
    fn name(&self) -> &str {
        "cancel_job"
    }

    fn description(&self) -> &str {
        "Remove a pending prompt from the ComfyUI queue."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "prompt_id": { "type": "string" } },
            "required": ["prompt_id"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let prompt_id = match required_str(&args, "prompt_id") {
            Ok(id) => id,
            Err(e) => return ToolResult::error(e),
        };
        match self.ctx.client.cancel_prompt(prompt_id).await {
            Ok(()) => {
                self.ctx
                    .webhooks
                    .dispatch("job_cancelled", json!({ "prompt_id": prompt_id, "reason": "cancelled" }));
                ToolResult::Json(json!({ "success": true, "prompt_id": prompt_id }))
            }
            Err(e) => ToolResult::error(format!("Failed to cancel {}: {}", prompt_id, e)),
        }
    }
}

pub struct InterruptTool {
    ctx: ToolContext,
}

impl InterruptTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for InterruptTool {
    fn name(&self) -> &str {
        "interrupt"
    }

    fn description(&self) -> &str {
        "Interrupt the prompt ComfyUI is currently executing."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> ToolResult {
        match self.ctx.client.interrupt().await {
            Ok(()) => {
                self.ctx
                    .webhooks
                    .dispatch("job_cancelled", json!({ "reason": "interrupted" }));
                ToolResult::Json(json!({ "success": true }))
            }
            Err(e) => ToolResult::error(format!("Failed to interrupt: {}", e)),
        }
    }
}
