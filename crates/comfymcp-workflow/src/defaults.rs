//! Per-namespace parameter defaults
//!
//! Lookup order: runtime (set through a tool) > config file `"defaults"` >
//! environment (`COMFY_MCP_DEFAULT_{IMAGE,AUDIO,VIDEO}_MODEL`) > hardcoded.
//! Per-call values sit above all of these and are applied by the caller.

use crate::error::{WorkflowError, WorkflowResult};
use comfymcp_core::Namespace;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultSource {
    Runtime,
    Config,
    Env,
    Hardcoded,
    Unknown,
}

fn hardcoded(ns: Namespace) -> Map<String, Value> {
    let v = match ns {
        Namespace::Image => json!({
            "width": 512, "height": 512, "steps": 20, "cfg": 1.0,
            "sampler_name": "euler", "scheduler": "simple", "denoise": 1.0,
            "negative_prompt": "", "lora_strength": 1.0, "controlnet_strength": 1.0
        }),
        Namespace::Audio => json!({
            "steps": 50, "cfg": 5.0, "sampler_name": "euler", "scheduler": "simple",
            "denoise": 1.0, "seconds": 60, "lyrics_strength": 0.99,
            "model": "ace_step_v1_3.5b.safetensors"
        }),
        Namespace::Video => json!({
            "width": 480, "height": 272, "steps": 20, "cfg": 5.0,
            "sampler_name": "euler", "scheduler": "simple", "denoise": 1.0,
            "negative_prompt": "blurry, low quality, distorted", "fps": 16, "frames": 33
        }),
        Namespace::ThreeD => json!({
            "steps": 20, "cfg": 7.0,
            "negative_prompt": "blurry, low quality, multiple objects",
            "resolution": 256, "model": "v1-5-pruned-emaonly.ckpt"
        }),
    };
    match v {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[derive(Default)]
struct Layers {
    runtime: HashMap<Namespace, Map<String, Value>>,
    config: HashMap<Namespace, Map<String, Value>>,
    available_models: HashSet<String>,
    invalid_models: HashMap<Namespace, String>,
}

pub struct DefaultsManager {
    config_path: PathBuf,
    env: HashMap<Namespace, Map<String, Value>>,
    layers: RwLock<Layers>,
}

impl DefaultsManager {
    /// Read the config file at `config_path` and the process environment.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self::with_env(config_path, |key| std::env::var(key).ok())
    }

    pub fn with_env(config_path: impl Into<PathBuf>, env: impl Fn(&str) -> Option<String>) -> Self {
        let config_path = config_path.into();
        let mut env_layer = HashMap::new();
        for (ns, key) in [
            (Namespace::Image, "COMFY_MCP_DEFAULT_IMAGE_MODEL"),
            (Namespace::Audio, "COMFY_MCP_DEFAULT_AUDIO_MODEL"),
            (Namespace::Video, "COMFY_MCP_DEFAULT_VIDEO_MODEL"),
        ] {
            if let Some(model) = env(key).filter(|v| !v.is_empty()) {
                let mut m = Map::new();
                m.insert("model".into(), Value::String(model));
                env_layer.insert(ns, m);
            }
        }

        let layers = Layers {
            config: load_config_defaults(&config_path),
            ..Default::default()
        };
        Self {
            config_path,
            env: env_layer,
            layers: RwLock::new(layers),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Layers> {
        self.layers.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Layers> {
        self.layers.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn get(&self, ns: Namespace, key: &str) -> Option<Value> {
        let layers = self.read();
        layers
            .runtime
            .get(&ns)
            .and_then(|m| m.get(key))
            .or_else(|| layers.config.get(&ns).and_then(|m| m.get(key)))
            .or_else(|| self.env.get(&ns).and_then(|m| m.get(key)))
            .cloned()
            .or_else(|| hardcoded(ns).remove(key))
    }

    /// Which layer currently supplies `key`.
    pub fn source(&self, ns: Namespace, key: &str) -> DefaultSource {
        let layers = self.read();
        let has = |m: Option<&Map<String, Value>>| m.is_some_and(|m| m.contains_key(key));
        if has(layers.runtime.get(&ns)) {
            DefaultSource::Runtime
        } else if has(layers.config.get(&ns)) {
            DefaultSource::Config
        } else if has(self.env.get(&ns)) {
            DefaultSource::Env
        } else if hardcoded(ns).contains_key(key) {
            DefaultSource::Hardcoded
        } else {
            DefaultSource::Unknown
        }
    }

    /// Merged view of every namespace.
    pub fn all(&self) -> BTreeMap<String, Map<String, Value>> {
        let layers = self.read();
        Namespace::ALL
            .iter()
            .map(|&ns| {
                let mut merged = hardcoded(ns);
                for layer in [self.env.get(&ns), layers.config.get(&ns), layers.runtime.get(&ns)]
                    .into_iter()
                    .flatten()
                {
                    merged.extend(layer.clone());
                }
                (ns.to_string(), merged)
            })
            .collect()
    }

    /// Apply runtime defaults. A `model` not in a non-empty `available` list
    /// rejects the whole update.
    pub fn set(&self, ns: Namespace, defaults: Map<String, Value>, available: &[String]) -> WorkflowResult<Map<String, Value>> {
        if let Some(model) = defaults.get("model").and_then(Value::as_str) {
            if !available.is_empty() && !available.iter().any(|m| m == model) {
                let preview: Vec<&str> = available.iter().take(5).map(String::as_str).collect();
                return Err(WorkflowError::Defaults(format!(
                    "Model '{}' not found. Available: {:?}...",
                    model, preview
                )));
            }
        }

        let mut layers = self.write();
        if let Some(model) = defaults.get("model").and_then(Value::as_str) {
            if layers.invalid_models.get(&ns).is_some_and(|m| m != model) {
                layers.invalid_models.remove(&ns);
            }
        }
        layers.runtime.entry(ns).or_default().extend(defaults.clone());
        info!("Updated {} runtime defaults: {:?}", ns, defaults.keys().collect::<Vec<_>>());
        Ok(defaults)
    }

    /// Merge into the config file's `"defaults"` and reload that layer.
    pub fn persist(&self, ns: Namespace, defaults: &Map<String, Value>) -> WorkflowResult<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut config: Value = std::fs::read_to_string(&self.config_path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .filter(Value::is_object)
            .unwrap_or_else(|| json!({}));

        let root = config
            .as_object_mut()
            .ok_or_else(|| WorkflowError::Defaults("config root is not an object".into()))?;
        let section = root.entry("defaults").or_insert_with(|| json!({}));
        if !section.is_object() {
            *section = json!({});
        }
        let ns_entry = section
            .as_object_mut()
            .ok_or_else(|| WorkflowError::Defaults("defaults is not an object".into()))?
            .entry(ns.as_str())
            .or_insert_with(|| json!({}));
        if !ns_entry.is_object() {
            *ns_entry = json!({});
        }
        if let Some(m) = ns_entry.as_object_mut() {
            m.extend(defaults.clone());
        }

        std::fs::write(&self.config_path, serde_json::to_string_pretty(&config)?)?;
        self.write().config = load_config_defaults(&self.config_path);
        info!("Persisted {} defaults to {}", ns, self.config_path.display());
        Ok(())
    }

    /// Record the models ComfyUI offers and flag default models it lacks.
    /// Returns `(namespace, model, source)` for each invalid default.
    pub fn validate_models(&self, available: &[String]) -> Vec<(Namespace, String, DefaultSource)> {
        {
            let mut layers = self.write();
            layers.available_models = available.iter().cloned().collect();
            layers.invalid_models.clear();
        }

        let mut invalid = Vec::new();
        for ns in Namespace::ALL {
            let Some(model) = self.get(ns, "model").and_then(|v| v.as_str().map(String::from)) else {
                continue;
            };
            if model.is_empty() || available.contains(&model) {
                continue;
            }
            let source = self.source(ns, "model");
            warn!(
                "Default model '{}' (from {:?}) for {} not found in ComfyUI.",
                model, source, ns
            );
            self.write().invalid_models.insert(ns, model.clone());
            invalid.push((ns, model, source));
        }
        invalid
    }

    pub fn is_model_valid(&self, ns: Namespace, model: &str) -> bool {
        if model.is_empty() {
            return true;
        }
        let layers = self.read();
        if layers.invalid_models.get(&ns).is_some_and(|m| m == model) {
            return false;
        }
        layers.available_models.contains(model)
    }

    /// Invalid default models found by the last `validate_models`.
    pub fn invalid_models(&self) -> BTreeMap<String, String> {
        self.read()
            .invalid_models
            .iter()
            .map(|(ns, m)| (ns.to_string(), m.clone()))
            .collect()
    }
}

fn load_config_defaults(path: &Path) -> HashMap<Namespace, Map<String, Value>> {
    let file = comfymcp_core::config::ConfigFile::load(path);
    let mut out = HashMap::new();
    for (key, value) in file.defaults {
        let Ok(ns) = key.parse::<Namespace>() else {
            warn!("Ignoring defaults for unknown namespace '{}'", key);
            continue;
        };
        if let Value::Object(map) = value {
            out.insert(ns, map);
        }
    }
    out
}
