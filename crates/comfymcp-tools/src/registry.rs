//! Tool registry and trait definitions
//!
//! Each tool is a self-contained type implementing the Tool trait. Builtin
//! tools live under tools/; per-workflow tools are generated at startup by
//! `create_default_registry()` in lib.rs.

use comfymcp_core::{CallToolResult, ToolContent, ToolDescriptor};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub enum ToolResult {
    Text(String),
    Json(Value),
    Error(String),
    /// Raw MCP content blocks (e.g. an inline image).
    Content(Vec<ToolContent>),
}

impl ToolResult {
    pub fn text(s: impl Into<String>) -> Self { Self::Text(s.into()) }
    pub fn error(s: impl Into<String>) -> Self { Self::Error(s.into()) }

    /// Serialize any value into a Json result.
    pub fn json(value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => Self::Json(v),
            Err(e) => Self::Error(format!("Failed to serialize result: {}", e)),
        }
    }

    pub fn to_content_string(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Json(v) => serde_json::to_string_pretty(v).unwrap_or_default(),
            Self::Error(e) => format!("Error: {}", e),
            Self::Content(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ToolContent::Text { text } => Some(text.clone()),
                    ToolContent::Image { mime_type, .. } => Some(format!("[{} image]", mime_type)),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_error(&self) -> bool { matches!(self, Self::Error(_)) }

    /// Json payload, if this is a Json result.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Convert to the `tools/call` result shape.
    pub fn into_call_result(self) -> CallToolResult {
        match self {
            Self::Text(s) => CallToolResult {
                content: vec![ToolContent::text(s)],
                is_error: false,
                structured_content: None,
            },
            Self::Json(v) => CallToolResult {
                content: vec![ToolContent::text(serde_json::to_string_pretty(&v).unwrap_or_default())],
                is_error: false,
                structured_content: v.is_object().then_some(v),
            },
            Self::Error(e) => CallToolResult {
                content: vec![ToolContent::text(format!("Error: {}", e))],
                is_error: true,
                structured_content: None,
            },
            Self::Content(blocks) => CallToolResult {
                content: blocks,
                is_error: false,
                structured_content: None,
            },
        }
    }
}

impl From<comfymcp_core::Error> for ToolResult {
    fn from(e: comfymcp_core::Error) -> Self {
        Self::Error(e.to_string())
    }
}

/// The Tool trait: implement this to expose a capability over MCP.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name (e.g. "run_workflow", "generate_image").
    fn name(&self) -> &str;

    /// Human-readable description sent to the client.
    fn description(&self) -> &str;

    /// JSON Schema for input parameters.
    fn input_schema(&self) -> Value;

    /// Whether this tool only reads state (no side effects).
    fn is_read_only(&self) -> bool { false }

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value) -> ToolResult;

    fn to_descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self { Self::new() }
}

impl ToolRegistry {
    pub fn new() -> Self { Self { tools: HashMap::new() } }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub async fn execute(&self, name: &str, args: Value) -> ToolResult {
        match self.tools.get(name) {
            Some(tool) => tool.execute(args).await,
            None => ToolResult::Error(format!("Tool not found: {}", name)),
        }
    }

    /// Descriptors for `tools/list`, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDescriptor> {
        let mut defs: Vec<ToolDescriptor> = self.tools.values().map(|t| t.to_descriptor()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn list_read_only(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .tools
            .iter()
            .filter(|(_, t)| t.is_read_only())
            .map(|(k, _)| k.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}
