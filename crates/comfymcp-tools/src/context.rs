//! Shared services handed to every tool

use comfymcp_assets::{AssetRegistry, PublishManager};
use comfymcp_client::{ComfyClient, CredentialStore};
use comfymcp_core::ComfyConfig;
use comfymcp_webhooks::WebhookManager;
use comfymcp_workflow::{DefaultsManager, WorkflowManager};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct ToolContext {
    pub config: Arc<ComfyConfig>,
    pub client: Arc<ComfyClient>,
    pub workflows: Arc<WorkflowManager>,
    pub defaults: Arc<DefaultsManager>,
    pub assets: Arc<AssetRegistry>,
    pub publisher: Arc<PublishManager>,
    pub webhooks: Arc<WebhookManager>,
    pub credentials: CredentialStore,
}

impl ToolContext {
    /// Build every service from a resolved config. Workflows are discovered
    /// here; credentials use the OS keyring.
    pub fn from_config(config: ComfyConfig) -> Self {
        let project_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::build(config, project_root, CredentialStore::keyring())
    }

    pub fn build(config: ComfyConfig, project_root: PathBuf, credentials: CredentialStore) -> Self {
        let client = ComfyClient::from_config(&config);
        let workflows = WorkflowManager::new(config.workflow_dir.clone());
        let defaults = DefaultsManager::new(config.config_path.clone());
        let assets = AssetRegistry::new(config.asset_ttl_hours, config.comfyui_url.clone());
        let publisher = PublishManager::new(config.publish_dir.clone(), project_root);
        Self {
            config: Arc::new(config),
            client: Arc::new(client),
            workflows: Arc::new(workflows),
            defaults: Arc::new(defaults),
            assets: Arc::new(assets),
            publisher: Arc::new(publisher),
            webhooks: Arc::new(WebhookManager::new()),
            credentials,
        }
    }
}
