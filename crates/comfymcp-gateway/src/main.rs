//! comfymcp - MCP server in front of ComfyUI

use comfymcp_core::{AuthConfig, AuthMode, BindMode, ComfyConfig, GatewayConfig};
use comfymcp_gateway::{serve_stdio, start_gateway, McpHandler, Runtime};
use comfymcp_workflow::WorkflowManager;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

#[derive(Parser)]
#[command(name = "comfymcp", about = "MCP server exposing ComfyUI workflows as tools")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server
    Serve {
        /// HTTP port (default: COMFY_MCP_PORT or 9000)
        #[arg(short, long)]
        port: Option<u16>,
        /// loopback or lan
        #[arg(short, long, default_value = "loopback")]
        bind: String,
        /// Require this bearer token on /mcp
        #[arg(short, long)]
        token: Option<String>,
        #[arg(short, long)]
        workflow_dir: Option<PathBuf>,
        /// Speak MCP over stdin/stdout instead of HTTP
        #[arg(long)]
        stdio: bool,
        /// Also write daily rolling log files here
        #[arg(long)]
        log_dir: Option<PathBuf>,
        /// JSON log lines
        #[arg(long)]
        log_json: bool,
    },
    /// Print the discovered workflow catalog
    Workflows {
        #[arg(short, long)]
        workflow_dir: Option<PathBuf>,
    },
    /// Show version
    Version,
}

fn init_tracing(log_dir: Option<&PathBuf>, json: bool) -> Option<WorkerGuard> {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "comfymcp=info,tower_http=info".into())
    };

    let stderr = if json {
        tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        tracing_subscriber::fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let (file, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "comfymcp.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr.with_filter(filter()))
        .with(file)
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve { port, bind, token, workflow_dir, stdio, log_dir, log_json }) => {
            let _guard = init_tracing(log_dir.as_ref(), log_json);

            let mut config = ComfyConfig::discover();
            if let Some(dir) = workflow_dir {
                config.workflow_dir = dir;
            }
            let bind_mode = match bind.as_str() {
                "lan" | "0.0.0.0" => BindMode::Lan,
                _ => BindMode::Loopback,
            };
            let auth = match token {
                Some(token) => AuthConfig { mode: AuthMode::Token, token: Some(token) },
                None if std::env::var("COMFY_MCP_TOKEN").is_ok() => AuthConfig { mode: AuthMode::Token, token: None },
                None => AuthConfig::default(),
            };
            let gateway = GatewayConfig {
                port: port.unwrap_or(config.mcp_port),
                bind: bind_mode,
                auth,
            };

            let runtime = Runtime::bootstrap(config).await;
            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutting down");
                    signal.cancel();
                }
            });

            let served = if stdio {
                let handler = McpHandler::new(runtime.tools.clone());
                let stdin = tokio::io::BufReader::new(tokio::io::stdin());
                serve_stdio(&handler, stdin, tokio::io::stdout(), shutdown).await
            } else {
                start_gateway(&runtime, &gateway, shutdown).await
            };
            runtime.shutdown().await;
            served?;
        }

        Some(Commands::Workflows { workflow_dir }) => {
            let config = ComfyConfig::discover();
            let dir = workflow_dir.unwrap_or(config.workflow_dir);
            let manager = WorkflowManager::new(dir);
            println!("{}", serde_json::to_string_pretty(&manager.catalog())?);
        }

        Some(Commands::Version) | None => {
            println!("comfymcp v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
