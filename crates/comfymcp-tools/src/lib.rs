//! comfymcp tools - the MCP tool surface
//!
//! Builtin tools live in src/tools/, grouped by concern. Every workflow with
//! PARAM_ placeholders also becomes its own tool, named after the workflow.

pub mod args;
pub mod context;
pub mod registry;
pub mod runner;
pub mod tools;

pub use context::ToolContext;
pub use registry::{Tool, ToolRegistry, ToolResult};

use tracing::{info, warn};

/// Registry with every builtin tool plus one tool per placeholder workflow.
pub fn create_default_registry(ctx: &ToolContext) -> ToolRegistry {
    let mut registry = create_builtin_registry(ctx);
    register_workflow_tools(&mut registry, ctx);
    registry
}

pub fn create_builtin_registry(ctx: &ToolContext) -> ToolRegistry {
    use tools::*;
    let mut registry = ToolRegistry::new();

    // --- Workflows ---
    registry.register(workflow::ListWorkflowsTool::new(ctx.clone()));
    registry.register(workflow::RunWorkflowTool::new(ctx.clone()));
    registry.register(workflow::ValidateWorkflowTool::new(ctx.clone()));

    // --- Batches & variations ---
    registry.register(batch::BatchGenerateTool::new(ctx.clone()));
    registry.register(batch::BatchGenerateSeedsTool::new(ctx.clone()));
    registry.register(variations::GenerateVariationsTool::new(ctx.clone()));

    // --- Assets ---
    registry.register(assets::ViewImageTool::new(ctx.clone()));
    registry.register(assets::ListAssetsTool::new(ctx.clone()));
    registry.register(assets::GetAssetMetadataTool::new(ctx.clone()));
    registry.register(assets::ResolveAssetTool::new(ctx.clone()));
    registry.register(assets::GetAssetLocalPathTool::new(ctx.clone()));

    // --- Publishing ---
    registry.register(publish::PublishAssetTool::new(ctx.clone()));
    registry.register(publish::GetPublishInfoTool::new(ctx.clone()));
    registry.register(publish::SetPublishDirTool::new(ctx.clone()));

    // --- Jobs ---
    registry.register(jobs::GetQueueStatusTool::new(ctx.clone()));
    registry.register(jobs::GetJobTool::new(ctx.clone()));
    registry.register(jobs::CancelJobTool::new(ctx.clone()));
    registry.register(jobs::InterruptTool::new(ctx.clone()));

    // --- Configuration ---
    registry.register(configuration::HealthCheckTool::new(ctx.clone()));
    registry.register(configuration::ListModelsTool::new(ctx.clone()));
    registry.register(configuration::GetDefaultsTool::new(ctx.clone()));
    registry.register(configuration::SetDefaultsTool::new(ctx.clone()));

    // --- Models ---
    for listing in models::LISTINGS {
        registry.register(models::ListNodeOptionsTool::new(ctx.clone(), listing));
    }
    registry.register(models::RefreshModelCacheTool::new(ctx.clone()));

    // --- Webhooks ---
    registry.register(webhooks::SetWebhookTool::new(ctx.clone()));
    registry.register(webhooks::RemoveWebhookTool::new(ctx.clone()));
    registry.register(webhooks::ListWebhooksTool::new(ctx.clone()));
    registry.register(webhooks::GetWebhookLogTool::new(ctx.clone()));
    registry.register(webhooks::UpdateWebhookTool::new(ctx.clone()));

    // --- Credentials ---
    registry.register(credentials::CredentialsStatusTool::new(ctx.clone()));

    registry
}

/// Add a generated tool for each placeholder workflow. Names already taken
/// are skipped. Returns how many were added.
pub fn register_workflow_tools(registry: &mut ToolRegistry, ctx: &ToolContext) -> usize {
    let mut added = 0;
    for def in ctx.workflows.definitions().filter(|d| d.has_placeholders()) {
        if registry.contains(&def.tool_name) {
            warn!(
                "Workflow {} not exposed: tool name '{}' already registered",
                def.workflow_id, def.tool_name
            );
            continue;
        }
        registry.register(tools::workflow::WorkflowTool::new(ctx.clone(), def));
        added += 1;
    }
    info!("Registered {} workflow tools", added);
    added
}
