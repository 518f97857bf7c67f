//! Webhook tools: manage subscriptions and inspect deliveries

use crate::args::{optional_bool, optional_object, optional_str, optional_usize, required_str, string_list};
use crate::context::ToolContext;
use crate::registry::{Tool, ToolResult};
use comfymcp_webhooks::WebhookEvent;
use serde_json::{json, Value};

const DEFAULT_LOG_LIMIT: usize = 50;
const MAX_LOG_LIMIT: usize = 500;

fn events_schema() -> Value {
    let names: Vec<&str> = WebhookEvent::ALL.iter().map(|e| e.as_str()).collect();
    json!({
        "type": "array",
        "items": { "type": "string", "enum": names },
        "description": "Events to subscribe to; omit for all"
    })
}

pub struct SetWebhookTool {
    ctx: ToolContext,
}

impl SetWebhookTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for SetWebhookTool {
    fn name(&self) -> &str {
        "set_webhook"
    }

    fn description(&self) -> &str {
        "Register an HTTP callback for generation events. With a secret, each POST carries X-Webhook-Signature: sha256=<HMAC-SHA256(secret, body)>."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "http:// or https:// endpoint" },
                "events": events_schema(),
                "secret": { "type": "string" },
                "metadata": { "type": "object" }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let url = match required_str(&args, "url") {
            Ok(u) => u,
            Err(e) => return ToolResult::error(e),
        };
        let events = string_list(&args, "events").unwrap_or_default();
        let secret = optional_str(&args, "secret").map(String::from);
        let metadata = optional_object(&args, "metadata").unwrap_or_default();
        match self.ctx.webhooks.register(url, &events, secret, metadata) {
            Ok(view) => ToolResult::json(view),
            Err(e) => comfymcp_core::Error::from(e).into(),
        }
    }
}

pub struct RemoveWebhookTool {
    ctx: ToolContext,
}

impl RemoveWebhookTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for RemoveWebhookTool {
    fn name(&self) -> &str {
        "remove_webhook"
    }

    fn description(&self) -> &str {
        "Remove a registered webhook."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "webhook_id": { "type": "string" } },
            "required": ["webhook_id"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let id = match required_str(&args, "webhook_id") {
            Ok(id) => id,
            Err(e) => return ToolResult::error(e),
        };
        if self.ctx.webhooks.unregister(id) {
            ToolResult::Json(json!({ "success": true, "webhook_id": id }))
        } else {
            ToolResult::error(format!("Webhook {} not found", id))
        }
    }
}

pub struct ListWebhooksTool {
    ctx: ToolContext,
}

impl ListWebhooksTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for ListWebhooksTool {
    fn name(&self) -> &str {
        "list_webhooks"
    }

    fn description(&self) -> &str {
        "List registered webhooks and the supported event names."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> ToolResult {
        let webhooks = self.ctx.webhooks.list();
        let supported: Vec<&str> = WebhookEvent::ALL.iter().map(|e| e.as_str()).collect();
        ToolResult::Json(json!({
            "webhooks": webhooks,
            "count": webhooks.len(),
            "supported_events": supported,
        }))
    }
}

pub struct GetWebhookLogTool {
    ctx: ToolContext,
}

impl GetWebhookLogTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for GetWebhookLogTool {
    fn name(&self) -> &str {
        "get_webhook_log"
    }

    fn description(&self) -> &str {
        "Recent webhook delivery attempts, newest first, with status codes, errors, retry counts and timings."
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "webhook_id": { "type": "string" },
                "event": { "type": "string" },
                "limit": { "type": "integer", "default": DEFAULT_LOG_LIMIT, "maximum": MAX_LOG_LIMIT }
            }
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let webhook_id = optional_str(&args, "webhook_id");
        let event = match optional_str(&args, "event").map(str::parse::<WebhookEvent>).transpose() {
            Ok(e) => e,
            Err(e) => return ToolResult::error(e.to_string()),
        };
        let limit = optional_usize(&args, "limit").unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_LOG_LIMIT);

        let entries = self.ctx.webhooks.delivery_log(webhook_id, event, limit);
        ToolResult::Json(json!({
            "entries": entries,
            "count": entries.len(),
            "filters": { "webhook_id": webhook_id, "event": event, "limit": limit },
        }))
    }
}

pub struct UpdateWebhookTool {
    ctx: ToolContext,
}

impl UpdateWebhookTool {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Tool for UpdateWebhookTool {
    fn name(&self) -> &str {
        "update_webhook"
    }

    fn description(&self) -> &str {
        "Enable or disable a webhook, or replace its event subscriptions."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "webhook_id": { "type": "string" },
                "active": { "type": "boolean" },
                "events": events_schema()
            },
            "required": ["webhook_id"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let id = match required_str(&args, "webhook_id") {
            Ok(id) => id,
            Err(e) => return ToolResult::error(e),
        };
        let active = optional_bool(&args, "active");
        let events = string_list(&args, "events");
        if active.is_none() && events.is_none() {
            return ToolResult::error("Nothing to update: pass active and/or events");
        }

        if let Some(events) = events {
            if let Err(e) = self.ctx.webhooks.update_events(id, &events) {
                return comfymcp_core::Error::from(e).into();
            }
        }
        if let Some(active) = active {
            if let Err(e) = self.ctx.webhooks.set_active(id, active) {
                return comfymcp_core::Error::from(e).into();
            }
        }
        match self.ctx.webhooks.get(id) {
            Some(view) => ToolResult::json(view),
            None => ToolResult::error(format!("Webhook {} not found", id)),
        }
    }
}
