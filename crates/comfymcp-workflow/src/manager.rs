//! Workflow discovery, catalog, rendering and requirement checks

use crate::defaults::DefaultsManager;
use crate::error::{WorkflowError, WorkflowResult};
use crate::template::{self, ParamType, ParameterSpec};
use comfymcp_client::ComfyClient;
use comfymcp_core::Namespace;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

fn id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"))
}

const IMAGE_OUTPUTS: &[&str] = &["images", "image", "gifs", "gif"];
const AUDIO_OUTPUTS: &[&str] = &["audio", "audios", "files"];
const VIDEO_OUTPUTS: &[&str] = &["videos", "video", "gifs", "gif"];
const MESH_OUTPUTS: &[&str] = &["glb", "meshes", "files"];

// ---------------------------------------------------------------------------
// Metadata sidecar (<id>.meta.json)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
    pub namespace: Option<Namespace>,
    pub defaults: Map<String, Value>,
    pub requirements: Option<Requirements>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Requirements {
    pub nodes: Vec<String>,
    pub models: ModelRequirements,
    pub minimum_vram_gb: Option<f64>,
    pub custom_nodes: BTreeMap<String, CustomNode>,
}

impl Requirements {
    fn is_empty(&self) -> bool {
        self.nodes.is_empty()
            && self.models.entries().is_empty()
            && self.minimum_vram_gb.is_none()
            && self.custom_nodes.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelRequirements {
    pub checkpoint: Option<String>,
    pub lora: Option<String>,
    pub controlnet: Option<String>,
    pub vae: Option<String>,
    pub upscale: Option<String>,
}

impl ModelRequirements {
    /// (model type, loader node class, input name, required model)
    fn entries(&self) -> Vec<(&'static str, &'static str, &'static str, &str)> {
        [
            ("checkpoint", "CheckpointLoaderSimple", "ckpt_name", &self.checkpoint),
            ("lora", "LoraLoader", "lora_name", &self.lora),
            ("controlnet", "ControlNetLoader", "control_net_name", &self.controlnet),
            ("vae", "VAELoader", "vae_name", &self.vae),
            ("upscale", "UpscaleModelLoader", "model_name", &self.upscale),
        ]
        .into_iter()
        .filter_map(|(kind, class, input, model)| model.as_deref().map(|m| (kind, class, input, m)))
        .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomNode {
    pub install: Option<String>,
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub workflow_id: String,
    pub tool_name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
    pub namespace: Namespace,
    pub output_preferences: Vec<String>,
    pub metadata: Option<WorkflowMetadata>,
    pub invalid_tokens: Vec<String>,
    pub graph: Value,
}

impl WorkflowDefinition {
    pub fn has_placeholders(&self) -> bool {
        !self.parameters.is_empty()
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogInput {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    pub description: String,
    pub inputs: Vec<CatalogInput>,
    pub namespace: Namespace,
    pub has_metadata: bool,
}

/// Outcome of `validate_requirements`.
#[derive(Debug, Clone, Serialize)]
pub struct RequirementsReport {
    pub workflow_id: String,
    pub ready: bool,
    pub missing_nodes: Vec<String>,
    pub missing_models: BTreeMap<String, String>,
    pub vram_ok: Option<bool>,
    pub vram_required_gb: Option<f64>,
    pub vram_free_gb: Option<f64>,
    pub warnings: Vec<String>,
}

impl RequirementsReport {
    fn new(workflow_id: &str) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            ready: true,
            missing_nodes: Vec::new(),
            missing_models: BTreeMap::new(),
            vram_ok: None,
            vram_required_gb: None,
            vram_free_gb: None,
            warnings: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct WorkflowManager {
    dir: PathBuf,
    definitions: BTreeMap<String, WorkflowDefinition>,
}

impl WorkflowManager {
    /// Create and run discovery over `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let mut manager = Self {
            dir: dir.into(),
            definitions: BTreeMap::new(),
        };
        manager.discover();
        manager
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rescan the directory. Returns the number of workflows found.
    pub fn discover(&mut self) -> usize {
        self.definitions.clear();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) => {
                warn!("Workflow directory {} unreadable: {}", self.dir.display(), e);
                return 0;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
                name.ends_with(".json") && !name.ends_with(".meta.json")
            })
            .collect();
        paths.sort();

        for path in paths {
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            if !id_re().is_match(&id) {
                warn!("Skipping workflow with unsafe name: {}", path.display());
                continue;
            }
            match self.build_definition(&id, &path) {
                Ok(def) => {
                    if !def.invalid_tokens.is_empty() {
                        warn!("Workflow {} has unnamed placeholders: {:?}", id, def.invalid_tokens);
                    }
                    debug!("Workflow {}: {} parameters", id, def.parameters.len());
                    self.definitions.insert(id, def);
                }
                Err(e) => warn!("Skipping workflow {}: {}", path.display(), e),
            }
        }

        info!(
            "Discovered {} workflows in {} ({} with parameters)",
            self.definitions.len(),
            self.dir.display(),
            self.definitions.values().filter(|d| d.has_placeholders()).count()
        );
        self.definitions.len()
    }

    fn build_definition(&self, id: &str, path: &Path) -> WorkflowResult<WorkflowDefinition> {
        let graph: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        if !graph.is_object() {
            return Err(WorkflowError::Invalid {
                workflow: id.to_string(),
                message: "root is not an object".into(),
            });
        }

        let metadata = self.load_metadata(id);
        let empty = Map::new();
        let meta_defaults = metadata.as_ref().map(|m| &m.defaults).unwrap_or(&empty);
        let scan = template::scan(&graph, meta_defaults);

        let class_types: Vec<&str> = graph
            .as_object()
            .into_iter()
            .flat_map(|nodes| nodes.values())
            .filter_map(|n| n["class_type"].as_str())
            .collect();
        let namespace = metadata
            .as_ref()
            .and_then(|m| m.namespace)
            .unwrap_or_else(|| infer_namespace(&class_types));

        let description = metadata
            .as_ref()
            .and_then(|m| m.description.clone())
            .unwrap_or_else(|| format!("Run the {} workflow", id));

        Ok(WorkflowDefinition {
            workflow_id: id.to_string(),
            tool_name: id.to_lowercase().replace('-', "_"),
            description,
            parameters: scan.parameters,
            namespace,
            output_preferences: output_preferences(&class_types),
            metadata,
            invalid_tokens: scan.invalid_tokens,
            graph,
        })
    }

    fn load_metadata(&self, id: &str) -> Option<WorkflowMetadata> {
        let path = self.dir.join(format!("{}.meta.json", id));
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!("Ignoring malformed metadata {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn definitions(&self) -> impl Iterator<Item = &WorkflowDefinition> {
        self.definitions.values()
    }

    pub fn definition(&self, id: &str) -> Option<&WorkflowDefinition> {
        self.definitions.get(id)
    }

    /// Look up by workflow id, falling back to the generated tool name.
    pub fn find(&self, id_or_tool: &str) -> Option<&WorkflowDefinition> {
        self.definition(id_or_tool)
            .or_else(|| self.definitions.values().find(|d| d.tool_name == id_or_tool))
    }

    pub fn catalog(&self) -> Vec<CatalogEntry> {
        self.definitions
            .values()
            .map(|d| CatalogEntry {
                id: d.workflow_id.clone(),
                name: d
                    .metadata
                    .as_ref()
                    .and_then(|m| m.name.clone())
                    .unwrap_or_else(|| d.workflow_id.replace(['_', '-'], " ")),
                description: d.description.clone(),
                inputs: d
                    .parameters
                    .iter()
                    .map(|p| CatalogInput {
                        name: p.name.clone(),
                        param_type: p.param_type,
                        required: p.required,
                        default: p.default.clone(),
                    })
                    .collect(),
                namespace: d.namespace,
                has_metadata: d.metadata.is_some(),
            })
            .collect()
    }

    /// Path of a workflow file, confined to the workflow directory.
    pub fn workflow_path(&self, id: &str) -> WorkflowResult<PathBuf> {
        if !id_re().is_match(id) {
            return Err(WorkflowError::NotFound(id.to_string()));
        }
        let path = self.dir.join(format!("{}.json", id));
        let canonical = path.canonicalize().map_err(|_| WorkflowError::NotFound(id.to_string()))?;
        let root = self.dir.canonicalize().map_err(|_| WorkflowError::NotFound(id.to_string()))?;
        if !canonical.starts_with(&root) {
            warn!("Workflow {} resolves outside {}", id, root.display());
            return Err(WorkflowError::NotFound(id.to_string()));
        }
        Ok(canonical)
    }

    /// Raw graph straight from disk.
    pub fn load(&self, id: &str) -> WorkflowResult<Value> {
        let path = self.workflow_path(id)?;
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    /// Produce an executable graph from a workflow and caller values.
    pub fn render(&self, id: &str, provided: &Map<String, Value>, defaults: &DefaultsManager) -> WorkflowResult<Value> {
        // Path check first so unsafe ids never reach the table lookup.
        self.workflow_path(id)?;
        let def = self
            .definitions
            .get(id)
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?;

        let unknown: Vec<&String> = provided.keys().filter(|k| def.parameter(k).is_none()).collect();
        if !unknown.is_empty() {
            let accepted: Vec<&str> = def.parameters.iter().map(|p| p.name.as_str()).collect();
            return Err(WorkflowError::InvalidParams(format!(
                "Unknown parameters for {}: {:?}. Accepted: {:?}",
                id, unknown, accepted
            )));
        }

        let mut values = Map::new();
        let mut missing = Vec::new();
        for param in &def.parameters {
            let raw = provided
                .get(&param.name)
                .filter(|v| !v.is_null())
                .cloned()
                .or_else(|| param.default.clone())
                .or_else(|| defaults.get(def.namespace, &param.name))
                .or_else(|| (param.name == "seed").then(|| Value::from(random_seed())));

            let Some(raw) = raw else {
                missing.push(param.name.as_str());
                continue;
            };
            let value = template::coerce(&raw, param.param_type)
                .map_err(|e| WorkflowError::InvalidParams(format!("Parameter '{}': {}", param.name, e)))?;
            values.insert(param.name.clone(), value);
        }
        if !missing.is_empty() {
            return Err(WorkflowError::InvalidParams(format!(
                "Missing values for workflow {}: {}. Pass them as arguments or set defaults.",
                id,
                missing.join(", ")
            )));
        }

        let rendered = template::substitute(&def.graph, &def.parameters, &values);
        let leftover = template::remaining_placeholders(&rendered);
        if !leftover.is_empty() {
            return Err(WorkflowError::Invalid {
                workflow: id.to_string(),
                message: format!("unresolved placeholders: {}", leftover.join(", ")),
            });
        }
        Ok(rendered)
    }

    /// JSON Schema for a workflow's parameters.
    pub fn input_schema(def: &WorkflowDefinition) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for p in &def.parameters {
            let mut prop = json!({
                "type": p.param_type.json_type(),
                "description": p.description(),
            });
            if let Some(default) = &p.default {
                prop["default"] = default.clone();
            }
            properties.insert(p.name.clone(), prop);
            if p.required {
                required.push(Value::String(p.name.clone()));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// Compare a workflow's declared requirements with a live ComfyUI.
    pub async fn validate_requirements(&self, id: &str, client: &ComfyClient) -> WorkflowResult<RequirementsReport> {
        self.workflow_path(id)?;
        let mut report = RequirementsReport::new(id);

        let Some(metadata) = self.load_metadata(id) else {
            report.warnings.push("No meta.json found; cannot validate requirements".into());
            return Ok(report);
        };
        let Some(req) = metadata.requirements.filter(|r| !r.is_empty()) else {
            report.warnings.push("meta.json has no requirements section".into());
            return Ok(report);
        };

        if !req.nodes.is_empty() {
            match client.object_info(None).await {
                Ok(info) => {
                    let available: BTreeSet<&str> =
                        info.as_object().map(|o| o.keys().map(String::as_str).collect()).unwrap_or_default();
                    for node in &req.nodes {
                        if !available.contains(node.as_str()) {
                            report.missing_nodes.push(node.clone());
                            report.ready = false;
                        }
                    }
                }
                Err(e) => report.warnings.push(format!("Node check failed: {}", e)),
            }
        }

        for (kind, class, input, model) in req.models.entries() {
            let available = if kind == "checkpoint" && !client.available_models().is_empty() {
                client.available_models()
            } else {
                client.models_for(class, input).await
            };
            if available.is_empty() && kind != "checkpoint" {
                report.warnings.push(format!("Could not verify {} model '{}'", kind, model));
                continue;
            }
            if !available.iter().any(|m| m == model) {
                report.missing_models.insert(kind.to_string(), model.to_string());
                report.ready = false;
            }
        }

        if let Some(min_gb) = req.minimum_vram_gb {
            report.vram_required_gb = Some(min_gb);
            let conn = client.check_connection().await;
            if let Some(free) = conn.vram_free.filter(|_| conn.connected) {
                let free_gb = (free as f64 / 1024f64.powi(3) * 100.0).round() / 100.0;
                report.vram_free_gb = Some(free_gb);
                let ok = free_gb >= min_gb;
                report.vram_ok = Some(ok);
                if !ok {
                    report.ready = false;
                    report
                        .warnings
                        .push(format!("Insufficient VRAM: {} GB free, {} GB required", free_gb, min_gb));
                }
            }
        }

        for node in &report.missing_nodes.clone() {
            if let Some(install) = req.custom_nodes.get(node).and_then(|c| c.install.as_deref()) {
                report.warnings.push(format!("Install '{}' for node {}", install, node));
            }
        }

        Ok(report)
    }
}

/// Seed in ComfyUI's usual 32-bit range.
pub fn random_seed() -> u64 {
    rand::thread_rng().gen_range(0..=u32::MAX as u64)
}

fn is_audio_class(c: &str) -> bool {
    c.contains("SaveAudio") || c.contains("PreviewAudio") || c.contains("AceStep") || c.contains("TextToSpeech")
}

fn is_video_class(c: &str) -> bool {
    c.contains("VideoCombine") || c.contains("SaveVideo") || c.contains("SaveAnimated") || c.contains("CreateVideo")
}

fn is_mesh_class(c: &str) -> bool {
    c.contains("3D") || c.contains("GLB") || c.contains("Mesh")
}

/// Namespace implied by a graph's node classes.
pub fn infer_namespace(class_types: &[&str]) -> Namespace {
    if class_types.iter().any(|c| is_audio_class(c)) {
        Namespace::Audio
    } else if class_types.iter().any(|c| is_video_class(c)) {
        Namespace::Video
    } else if class_types.iter().any(|c| is_mesh_class(c)) {
        Namespace::ThreeD
    } else {
        Namespace::Image
    }
}

/// Ordered history output keys to look for.
pub fn output_preferences(class_types: &[&str]) -> Vec<String> {
    let keys = match infer_namespace(class_types) {
        Namespace::Audio => AUDIO_OUTPUTS,
        Namespace::Video => VIDEO_OUTPUTS,
        Namespace::ThreeD => MESH_OUTPUTS,
        Namespace::Image => IMAGE_OUTPUTS,
    };
    keys.iter().map(|k| k.to_string()).collect()
}
