//! Credential status tool. Token values are never returned.

use crate::context::ToolContext;
use crate::registry::{Tool, ToolResult};
use serde_json::{json, Map, Value};

pub struct CredentialsStatusTool {
    ctx: ToolContext,
}

impl CredentialsStatusTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for CredentialsStatusTool {
    fn name(&self) -> &str {
        "credentials_status"
    }

    fn description(&self) -> &str {
        "Which service tokens (huggingface, civitai, elevenlabs) are stored in the OS keyring."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> ToolResult {
        let credentials = self.ctx.credentials.clone();
        let status = tokio::task::spawn_blocking(move || credentials.status()).await;
        match status {
            Ok(entries) => {
                let services: Map<String, Value> = entries
                    .into_iter()
                    .map(|(name, stored)| (name.to_string(), json!({ "configured": stored })))
                    .collect();
                ToolResult::Json(json!({ "services": services }))
            }
            Err(e) => ToolResult::error(format!("Credential lookup failed: {}", e)),
        }
    }
}
