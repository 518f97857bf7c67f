//! Server configuration resolved from the environment and ~/.config/comfy-mcp/config.json
//!
//! Resolution order for every field: explicit value (CLI) > environment
//! variable > config file > built-in default. Explicit values are applied by
//! the caller after `resolve`.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEFAULT_COMFYUI_URL: &str = "http://localhost:8188";

/// Model folder names under `<comfyui_path>/models`.
pub const MODEL_FOLDERS: &[&str] = &[
    "checkpoints",
    "diffusion_models",
    "vae",
    "clip",
    "text_encoders",
    "controlnet",
    "upscale_models",
    "loras",
    "diffusers",
    "tts",
];

/// On-disk config file. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub comfyui_url: Option<String>,
    pub workflow_dir: Option<String>,
    pub publish_dir: Option<String>,
    pub output_root: Option<String>,
    pub asset_ttl_hours: Option<u64>,
    pub generation_timeout: Option<u64>,
    /// Persisted per-namespace defaults, read by the defaults resolver.
    pub defaults: Map<String, Value>,
}

impl ConfigFile {
    /// Load from a specific path. Missing or malformed files yield an empty config.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Ignoring malformed config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }
}

/// Resolved configuration for talking to ComfyUI and serving MCP.
#[derive(Debug, Clone)]
pub struct ComfyConfig {
    pub comfyui_url: String,
    pub generation_timeout_secs: u64,
    pub max_retries: u32,
    pub asset_ttl_hours: u64,
    pub mcp_port: u16,
    pub comfyui_path: Option<PathBuf>,
    pub output_root: Option<PathBuf>,
    pub workflow_dir: PathBuf,
    pub publish_dir: Option<PathBuf>,
    pub model_folders: BTreeMap<String, PathBuf>,
    pub config_path: PathBuf,
}

impl Default for ComfyConfig {
    fn default() -> Self {
        Self::resolve(&ConfigFile::default(), |_| None)
    }
}

impl ComfyConfig {
    /// Discover from the process environment and the default config file.
    pub fn discover() -> Self {
        let path = Self::default_path();
        let file = ConfigFile::load(&path);
        let mut config = Self::resolve(&file, |key| std::env::var(key).ok());
        config.config_path = path;
        config
    }

    /// Resolve from a config file and an environment lookup.
    pub fn resolve(file: &ConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let comfyui_url = env("COMFYUI_URL")
            .or_else(|| file.comfyui_url.clone())
            .unwrap_or_else(|| DEFAULT_COMFYUI_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let generation_timeout_secs = parse_env(&env, "COMFY_MCP_GENERATION_TIMEOUT")
            .or(file.generation_timeout)
            .unwrap_or(300);
        let asset_ttl_hours = parse_env(&env, "COMFY_MCP_ASSET_TTL_HOURS")
            .or(file.asset_ttl_hours)
            .unwrap_or(24);
        let mcp_port = parse_env(&env, "COMFY_MCP_PORT").unwrap_or(9000);

        let comfyui_path = env("COMFYUI_PATH").map(|p| expand_tilde(&p));
        let output_root = env("COMFYUI_OUTPUT_ROOT")
            .or_else(|| file.output_root.clone())
            .map(|p| expand_tilde(&p));
        let workflow_dir = env("COMFY_MCP_WORKFLOW_DIR")
            .or_else(|| file.workflow_dir.clone())
            .map(|p| expand_tilde(&p))
            .unwrap_or_else(|| PathBuf::from("workflows"));
        let publish_dir = env("COMFY_MCP_PUBLISH_DIR")
            .or_else(|| file.publish_dir.clone())
            .map(|p| expand_tilde(&p));

        let model_folders = comfyui_path
            .as_ref()
            .map(|root| {
                let base = root.join("models");
                MODEL_FOLDERS
                    .iter()
                    .map(|name| (name.to_string(), base.join(name)))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            comfyui_url,
            generation_timeout_secs,
            max_retries: 5,
            asset_ttl_hours,
            mcp_port,
            comfyui_path,
            output_root,
            workflow_dir,
            publish_dir,
            model_folders,
            config_path: Self::default_path(),
        }
    }

    /// Default path: ~/.config/comfy-mcp/config.json
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".config")
            .join("comfy-mcp")
            .join("config.json")
    }

    /// Filesystem folder for a model type, when the ComfyUI install path is known.
    pub fn model_folder(&self, model_type: &str) -> Option<&Path> {
        self.model_folders.get(model_type).map(|p| p.as_path())
    }
}

fn parse_env<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring non-numeric {}={}", key, raw);
            None
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
