//! Server bootstrap: check ComfyUI, validate defaults, build the tool
//! registry, and start background maintenance

use comfymcp_assets::AssetRegistry;
use comfymcp_client::ProgressMonitor;
use comfymcp_core::ComfyConfig;
use comfymcp_tools::{create_default_registry, ToolContext, ToolRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Everything a transport needs to serve requests.
pub struct Runtime {
    pub ctx: ToolContext,
    pub tools: Arc<ToolRegistry>,
    pub cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Wrap an already built context. No network calls, no background tasks.
    pub fn new(ctx: ToolContext) -> Self {
        let tools = Arc::new(create_default_registry(&ctx));
        Self { ctx, tools, cancel: CancellationToken::new(), tasks: Vec::new() }
    }

    /// Full startup against the configured ComfyUI.
    pub async fn bootstrap(config: ComfyConfig) -> Self {
        info!("ComfyUI: {}", config.comfyui_url);
        info!("Workflows: {}", config.workflow_dir.display());
        let ctx = ToolContext::from_config(config);

        let conn = ctx.client.check_connection().await;
        if conn.connected {
            let models = ctx.client.refresh_models().await;
            for (ns, model, source) in ctx.defaults.validate_models(&models) {
                warn!("Default {} model '{}' ({:?}) is not installed in ComfyUI", ns, model, source);
            }
        } else {
            warn!(
                "ComfyUI not reachable at startup ({}); model validation skipped",
                conn.error.as_deref().unwrap_or("unknown error")
            );
        }

        let mut runtime = Self::new(ctx);
        info!("Registered {} tools", runtime.tools.len());

        let cleanup = spawn_asset_cleanup(runtime.ctx.assets.clone(), CLEANUP_INTERVAL, runtime.cancel.clone());
        runtime.tasks.push(cleanup);
        if conn.connected {
            if let Some(task) = spawn_progress_monitor(&runtime.ctx, runtime.cancel.clone()).await {
                runtime.tasks.push(task);
            }
        }
        runtime
    }

    /// Stop background tasks.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Background tasks stopped");
    }
}

/// Periodically evict expired assets until cancelled.
pub fn spawn_asset_cleanup(assets: Arc<AssetRegistry>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    let removed = assets.cleanup_expired();
                    if removed > 0 {
                        info!("Asset cleanup removed {} expired assets", removed);
                    }
                }
            }
        }
    })
}

async fn spawn_progress_monitor(ctx: &ToolContext, cancel: CancellationToken) -> Option<JoinHandle<()>> {
    let monitor = Arc::new(ProgressMonitor::new(ctx.client.base_url(), ctx.client.client_id()));
    let mut events = monitor.subscribe();
    let pump = match monitor.connect().await {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Progress monitor unavailable: {}", e);
            return None;
        }
    };

    Some(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    pump.abort();
                    break;
                }
                ev = events.recv() => match ev {
                    Ok(ev) => debug!("{:?} {:?} {:.1}%", ev.kind, ev.prompt_id, ev.percent),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => debug!("progress lagged by {}", n),
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }))
}
