//! ComfyUI REST client
//!
//! Thin async wrapper over ComfyUI's HTTP API: health, model listings,
//! prompt queueing, history polling, queue management and uploads.

use crate::errors::{
    node_errors_message, parse_comfyui_error, parse_execution_error, ClientError, ClientResult,
};
use comfymcp_core::nodes_in_order;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Matches Python's `quote(s, safe="")`: everything but unreserved characters is escaped.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Connection check result.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vram_total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vram_free: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// First output asset of a finished prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputAsset {
    pub filename: String,
    pub subfolder: String,
    pub folder_type: String,
}

/// Everything known about a completed workflow run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub prompt_id: String,
    pub filename: String,
    pub subfolder: String,
    pub folder_type: String,
    pub asset_url: String,
    pub mime_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bytes_size: Option<u64>,
    pub outputs: Value,
    pub history: Option<Value>,
    pub submitted_workflow: Value,
}

/// One queue entry.
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub number: Value,
    pub prompt_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueInfo {
    pub running: Vec<QueueItem>,
    pub pending: Vec<QueueItem>,
    pub running_count: usize,
    pub pending_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub status: JobState,
    pub progress: f32,
    pub outputs: Vec<String>,
    pub error: Option<String>,
}

pub struct ComfyClient {
    http: Client,
    base_url: String,
    client_id: String,
    timeout: Duration,
    available_models: RwLock<Vec<String>>,
}

impl ComfyClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: uuid::Uuid::new_v4().to_string(),
            timeout: Duration::from_secs(300),
            available_models: RwLock::new(Vec::new()),
        }
    }

    pub fn from_config(config: &comfymcp_core::ComfyConfig) -> Self {
        Self::new(&config.comfyui_url).with_timeout(Duration::from_secs(config.generation_timeout_secs))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn generation_timeout(&self) -> Duration {
        self.timeout
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `/view` URL for an output file, percent-encoded.
    pub fn view_url(&self, filename: &str, subfolder: &str, folder_type: &str) -> String {
        view_url(&self.base_url, filename, subfolder, folder_type)
    }

    // -----------------------------------------------------------------------
    // Connection / health
    // -----------------------------------------------------------------------

    pub async fn is_available(&self) -> bool {
        match self.http.get(self.url("/system_stats")).timeout(Duration::from_secs(5)).send().await {
            Ok(r) => r.status().is_success(),
            Err(_) => false,
        }
    }

    pub async fn system_stats(&self) -> ClientResult<Value> {
        let r = self.http.get(self.url("/system_stats")).timeout(Duration::from_secs(5)).send().await?;
        if !r.status().is_success() {
            return Err(ClientError::RequestFailed(format!("system_stats: HTTP {}", r.status())));
        }
        Ok(r.json().await?)
    }

    pub async fn check_connection(&self) -> ConnectionStatus {
        match self.system_stats().await {
            Ok(stats) => {
                let dev = &stats["devices"][0];
                ConnectionStatus {
                    connected: true,
                    vram_total: dev["vram_total"].as_u64(),
                    vram_free: dev["vram_free"].as_u64(),
                    error: None,
                }
            }
            Err(e) => ConnectionStatus {
                connected: false,
                error: Some(e.to_string()),
                ..Default::default()
            },
        }
    }

    // -----------------------------------------------------------------------
    // Models
    // -----------------------------------------------------------------------

    /// Cached checkpoint names from the last `refresh_models`.
    pub fn available_models(&self) -> Vec<String> {
        self.available_models.read().map(|m| m.clone()).unwrap_or_default()
    }

    /// Replace the cached checkpoint list (used when ComfyUI is queried elsewhere).
    pub fn set_available_models(&self, models: Vec<String>) {
        if let Ok(mut guard) = self.available_models.write() {
            *guard = models;
        }
    }

    pub async fn refresh_models(&self) -> Vec<String> {
        let models = self.models_for("CheckpointLoaderSimple", "ckpt_name").await;
        if models.is_empty() {
            warn!("No checkpoint models reported by ComfyUI at {}", self.base_url);
        } else {
            info!("ComfyUI reports {} checkpoint models", models.len());
        }
        self.set_available_models(models.clone());
        models
    }

    /// Model list of a loader node's input, e.g. ("LoraLoader", "lora_name").
    pub async fn models_for(&self, node_class: &str, input_name: &str) -> Vec<String> {
        match self.object_info(Some(node_class)).await {
            Ok(info) => model_list_from_object_info(&info, node_class, input_name),
            Err(e) => {
                debug!("object_info/{} unavailable: {}", node_class, e);
                Vec::new()
            }
        }
    }

    pub async fn object_info(&self, node_class: Option<&str>) -> ClientResult<Value> {
        let path = match node_class {
            Some(class) => format!("/object_info/{}", class),
            None => "/object_info".to_string(),
        };
        let r = self.http.get(self.url(&path)).timeout(Duration::from_secs(30)).send().await?;
        if !r.status().is_success() {
            return Err(ClientError::RequestFailed(format!("{}: HTTP {}", path, r.status())));
        }
        Ok(r.json().await?)
    }

    // -----------------------------------------------------------------------
    // Workflow execution
    // -----------------------------------------------------------------------

    /// Queue a rendered graph, wait for it, and describe its first output.
    pub async fn run_workflow(&self, workflow: &Value, output_keys: &[String]) -> ClientResult<RunOutput> {
        let prompt_id = self.queue_prompt(workflow).await?;
        let outputs = self.wait_for_prompt(&prompt_id, self.timeout).await?;

        let asset = first_output_asset(&outputs, output_keys)?;
        let asset_url = self.view_url(&asset.filename, &asset.subfolder, &asset.folder_type);

        let mut mime_type = mime_from_filename(&asset.filename).map(String::from);
        let (width, height) = latent_dimensions(workflow);
        let mut bytes_size = None;

        match self.http.head(&asset_url).timeout(Duration::from_secs(5)).send().await {
            Ok(r) if r.status().is_success() => {
                bytes_size = r
                    .headers()
                    .get(reqwest::header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                if mime_type.is_none() {
                    mime_type = r
                        .headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
                }
            }
            Ok(r) => debug!("HEAD {} returned {}", asset_url, r.status()),
            Err(e) => debug!("HEAD {} failed: {}", asset_url, e),
        }

        let history = match self.history(Some(&prompt_id)).await {
            Ok(h) => h.get(&prompt_id).cloned(),
            Err(_) => None,
        };

        Ok(RunOutput {
            prompt_id,
            filename: asset.filename,
            subfolder: asset.subfolder,
            folder_type: asset.folder_type,
            asset_url,
            mime_type,
            width,
            height,
            bytes_size,
            outputs,
            history,
            submitted_workflow: workflow.clone(),
        })
    }

    /// Submit a graph to `/prompt` and return its prompt id.
    pub async fn queue_prompt(&self, workflow: &Value) -> ClientResult<String> {
        if !self.is_available().await {
            return Err(ClientError::Unavailable(self.base_url.clone()));
        }

        let body = json!({ "prompt": workflow, "client_id": self.client_id });
        let r = self
            .http
            .post(self.url("/prompt"))
            .json(&body)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| ClientError::RequestFailed(format!("Failed to connect to ComfyUI: {}", e)))?;

        let status = r.status();
        let text = r.text().await.unwrap_or_default();

        if status != StatusCode::OK {
            if let Ok(err) = serde_json::from_str::<Value>(&text) {
                if let Some(node_msg) = node_errors_message(&err) {
                    return Err(ClientError::Validation(node_msg));
                }
                if let Some(error) = err.get("error") {
                    return Err(ClientError::Execution(parse_comfyui_error(error)));
                }
            }
            let snippet: String = text.chars().take(500).collect();
            return Err(ClientError::RequestFailed(format!(
                "Failed to queue workflow: {} - {}",
                status.as_u16(),
                snippet
            )));
        }

        let data: Value = serde_json::from_str(&text)
            .map_err(|e| ClientError::InvalidResponse(format!("prompt response: {}", e)))?;
        let prompt_id = data["prompt_id"]
            .as_str()
            .ok_or_else(|| ClientError::InvalidResponse("Response missing prompt_id".into()))?
            .to_string();
        info!("Queued workflow with prompt_id: {}", prompt_id);
        Ok(prompt_id)
    }

    /// Poll `/history/{id}` until outputs appear, the prompt fails, or `timeout` passes.
    pub async fn wait_for_prompt(&self, prompt_id: &str, timeout: Duration) -> ClientResult<Value> {
        let started = Instant::now();
        let path = format!("/history/{}", prompt_id);

        while started.elapsed() < timeout {
            let resp = self.http.get(self.url(&path)).timeout(Duration::from_secs(10)).send().await;
            let history: Value = match resp {
                Ok(r) if r.status().is_success() => match r.json().await {
                    Ok(v) => v,
                    Err(_) => {
                        tokio::time::sleep(POLL_INTERVAL).await;
                        continue;
                    }
                },
                _ => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                    continue;
                }
            };

            if let Some(outputs) = check_history_entry(&history, prompt_id)? {
                info!(
                    "Workflow {} completed. Output nodes: {:?}",
                    prompt_id,
                    outputs.as_object().map(|o| o.keys().cloned().collect::<Vec<_>>())
                );
                return Ok(outputs);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        Err(ClientError::Timeout {
            prompt_id: prompt_id.to_string(),
            secs: timeout.as_secs(),
        })
    }

    // -----------------------------------------------------------------------
    // Queue management
    // -----------------------------------------------------------------------

    pub async fn queue(&self) -> ClientResult<Value> {
        let r = self.http.get(self.url("/queue")).timeout(Duration::from_secs(10)).send().await?;
        if !r.status().is_success() {
            return Err(ClientError::RequestFailed(format!("Failed to get queue status: HTTP {}", r.status())));
        }
        Ok(r.json().await?)
    }

    pub async fn queue_info(&self) -> ClientResult<QueueInfo> {
        let qs = self.queue().await?;
        Ok(parse_queue(&qs))
    }

    pub async fn cancel_prompt(&self, prompt_id: &str) -> ClientResult<()> {
        let r = self
            .http
            .post(self.url("/queue"))
            .json(&json!({ "delete": [prompt_id] }))
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        if !r.status().is_success() {
            return Err(ClientError::RequestFailed(format!("Failed to cancel prompt: HTTP {}", r.status())));
        }
        Ok(())
    }

    pub async fn interrupt(&self) -> ClientResult<()> {
        let r = self.http.post(self.url("/interrupt")).timeout(Duration::from_secs(5)).send().await?;
        if !r.status().is_success() {
            return Err(ClientError::RequestFailed(format!("interrupt: HTTP {}", r.status())));
        }
        Ok(())
    }

    pub async fn clear_queue(&self) -> ClientResult<()> {
        let r = self
            .http
            .post(self.url("/queue"))
            .json(&json!({ "clear": true }))
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        if !r.status().is_success() {
            return Err(ClientError::RequestFailed(format!("clear queue: HTTP {}", r.status())));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // History / job status
    // -----------------------------------------------------------------------

    pub async fn history(&self, prompt_id: Option<&str>) -> ClientResult<Value> {
        let path = match prompt_id {
            Some(id) => format!("/history/{}", id),
            None => "/history".to_string(),
        };
        let r = self.http.get(self.url(&path)).timeout(Duration::from_secs(10)).send().await?;
        if !r.status().is_success() {
            return Err(ClientError::RequestFailed(format!("Failed to get history: HTTP {}", r.status())));
        }
        Ok(r.json().await?)
    }

    pub async fn job_status(&self, prompt_id: &str) -> JobStatus {
        if let Ok(history) = self.history(Some(prompt_id)).await {
            if let Some(entry) = history.get(prompt_id) {
                return JobStatus {
                    status: JobState::Completed,
                    progress: 100.0,
                    outputs: output_paths(&entry["outputs"]),
                    error: None,
                };
            }
        }

        let qs = match self.queue().await {
            Ok(qs) => qs,
            Err(_) => {
                return JobStatus {
                    status: JobState::Error,
                    progress: 0.0,
                    outputs: Vec::new(),
                    error: Some("Cannot reach ComfyUI".into()),
                }
            }
        };

        let info = parse_queue(&qs);
        if info.running.iter().any(|i| i.prompt_id == prompt_id) {
            return JobStatus { status: JobState::Running, progress: 50.0, outputs: Vec::new(), error: None };
        }
        if info.pending.iter().any(|i| i.prompt_id == prompt_id) {
            return JobStatus { status: JobState::Pending, progress: 0.0, outputs: Vec::new(), error: None };
        }
        JobStatus {
            status: JobState::Error,
            progress: 0.0,
            outputs: Vec::new(),
            error: Some("Job not found in queue or history".into()),
        }
    }

    // -----------------------------------------------------------------------
    // Transfer
    // -----------------------------------------------------------------------

    pub async fn fetch_bytes(&self, url: &str) -> ClientResult<Vec<u8>> {
        let r = self.http.get(url).timeout(Duration::from_secs(60)).send().await?;
        if !r.status().is_success() {
            return Err(ClientError::RequestFailed(format!("GET {}: HTTP {}", url, r.status())));
        }
        Ok(r.bytes().await?.to_vec())
    }

    /// Upload into ComfyUI's input folder. Returns the stored input filename.
    pub async fn upload_image(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        mime_type: &str,
        overwrite: bool,
    ) -> ClientResult<String> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime_type)
            .map_err(|e| ClientError::RequestFailed(format!("invalid mime type {}: {}", mime_type, e)))?;
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("overwrite", overwrite.to_string());

        let r = self
            .http
            .post(self.url("/upload/image"))
            .multipart(form)
            .timeout(Duration::from_secs(60))
            .send()
            .await?;
        if !r.status().is_success() {
            return Err(ClientError::RequestFailed(format!("Failed to upload image: HTTP {}", r.status())));
        }
        let body: Value = r.json().await?;
        Ok(body["name"].as_str().unwrap_or(filename).to_string())
    }
}

// ---------------------------------------------------------------------------
// Pure helpers (no I/O)
// ---------------------------------------------------------------------------

pub fn view_url(base_url: &str, filename: &str, subfolder: &str, folder_type: &str) -> String {
    let mut url = format!(
        "{}/view?filename={}",
        base_url.trim_end_matches('/'),
        utf8_percent_encode(filename, QUERY_VALUE)
    );
    if !subfolder.is_empty() {
        url.push_str("&subfolder=");
        url.push_str(&utf8_percent_encode(subfolder, QUERY_VALUE).to_string());
    }
    url.push_str("&type=");
    url.push_str(folder_type);
    url
}

/// Inspect a `/history/{id}` body.
///
/// `Ok(None)` means not finished yet, `Ok(Some(outputs))` means done,
/// `Err` means ComfyUI reported a failure.
pub fn check_history_entry(history: &Value, prompt_id: &str) -> ClientResult<Option<Value>> {
    let Some(entry) = history.get(prompt_id).filter(|e| e.is_object()) else {
        return Ok(None);
    };

    if let Some(error) = entry.get("error") {
        return Err(ClientError::Execution(format!(
            "Workflow failed: {}",
            parse_comfyui_error(error)
        )));
    }

    let status = &entry["status"];
    if status.is_object() {
        let failed = status["status_str"].as_str() == Some("error") || status["completed"] == Value::Bool(false);
        if failed {
            let messages = status["messages"].as_array().cloned().unwrap_or_default();
            for msg in &messages {
                if msg[0].as_str() == Some("execution_error") && msg[1].is_object() {
                    return Err(ClientError::Execution(parse_execution_error(&msg[1])));
                }
            }
            return Err(ClientError::Execution(format!(
                "Workflow failed: {}",
                Value::Array(messages)
            )));
        }
    }

    match entry.get("outputs") {
        Some(outputs) if outputs.as_object().is_some_and(|o| !o.is_empty()) => Ok(Some(outputs.clone())),
        _ => Ok(None),
    }
}

/// First file-like output under any of the preferred keys, in key order per
/// node, visiting nodes in node-id order.
pub fn first_output_asset(outputs: &Value, preferred: &[String]) -> ClientResult<OutputAsset> {
    if let Some(nodes) = outputs.as_object() {
        for (_, node_output) in nodes_in_order(nodes).into_iter().filter(|(_, v)| v.is_object()) {
            for key in preferred {
                let Some(first) = node_output[key.as_str()].as_array().and_then(|a| a.first()) else {
                    continue;
                };
                let Some(filename) = first["filename"].as_str().filter(|f| !f.is_empty()) else {
                    continue;
                };
                return Ok(OutputAsset {
                    filename: filename.to_string(),
                    subfolder: first["subfolder"].as_str().unwrap_or("").to_string(),
                    folder_type: first["type"].as_str().unwrap_or("output").to_string(),
                });
            }
        }
    }

    let available = outputs
        .as_object()
        .map(|nodes| {
            nodes
                .iter()
                .map(|(id, v)| {
                    let keys: Vec<&str> = v.as_object().map(|o| o.keys().map(String::as_str).collect()).unwrap_or_default();
                    format!("{}: {:?}", id, keys)
                })
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    Err(ClientError::NoOutputs {
        preferred: preferred.to_vec(),
        available,
    })
}

pub fn mime_from_filename(filename: &str) -> Option<&'static str> {
    let lower = filename.to_lowercase();
    const TABLE: &[(&str, &str)] = &[
        (".png", "image/png"),
        (".jpg", "image/jpeg"),
        (".jpeg", "image/jpeg"),
        (".webp", "image/webp"),
        (".gif", "image/gif"),
        (".mp3", "audio/mpeg"),
        (".mp4", "video/mp4"),
        (".webm", "video/webm"),
        (".wav", "audio/wav"),
        (".flac", "audio/flac"),
        (".glb", "model/gltf-binary"),
    ];
    TABLE.iter().find(|(ext, _)| lower.ends_with(ext)).map(|(_, mime)| *mime)
}

/// Width/height of the first `EmptyLatentImage` node with concrete numbers.
pub fn latent_dimensions(workflow: &Value) -> (Option<u32>, Option<u32>) {
    let Some(nodes) = workflow.as_object() else {
        return (None, None);
    };
    for (_, node) in nodes_in_order(nodes) {
        if node["class_type"].as_str() == Some("EmptyLatentImage") {
            let w = node["inputs"]["width"].as_u64().map(|v| v as u32);
            let h = node["inputs"]["height"].as_u64().map(|v| v as u32);
            if w.is_some() && h.is_some() {
                return (w, h);
            }
        }
    }
    (None, None)
}

pub fn model_list_from_object_info(info: &Value, node_class: &str, input_name: &str) -> Vec<String> {
    let spec = &info[node_class]["input"]["required"][input_name];
    let list = match spec.as_array() {
        Some(arr) => match arr.first() {
            Some(Value::Array(inner)) => inner.clone(),
            Some(_) => arr.clone(),
            None => Vec::new(),
        },
        None => Vec::new(),
    };
    list.into_iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect()
}

pub fn parse_queue(qs: &Value) -> QueueInfo {
    let items = |key: &str| -> Vec<QueueItem> {
        qs[key]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|item| {
                let arr = item.as_array().filter(|a| a.len() >= 2)?;
                Some(QueueItem {
                    number: arr[0].clone(),
                    prompt_id: arr[1].as_str()?.to_string(),
                })
            })
            .collect()
    };
    let running = items("queue_running");
    let pending = items("queue_pending");
    QueueInfo {
        running_count: running.len(),
        pending_count: pending.len(),
        running,
        pending,
    }
}

/// Relative paths of files named in a history `outputs` object.
pub fn output_paths(outputs: &Value) -> Vec<String> {
    let mut paths = Vec::new();
    let is_mesh = |s: &str| s.ends_with(".glb") || s.ends_with(".gltf");

    for node in outputs.as_object().into_iter().flat_map(|o| o.values()) {
        let Some(obj) = node.as_object() else { continue };
        for key in ["glb_path", "file_path", "mesh_path"] {
            match obj.get(key) {
                Some(Value::String(s)) => paths.push(s.clone()),
                Some(Value::Array(arr)) => paths.extend(arr.iter().filter_map(|v| v.as_str().map(String::from))),
                _ => {}
            }
        }
        for img in obj.get("images").and_then(Value::as_array).into_iter().flatten() {
            if let Some(name) = img["filename"].as_str() {
                let sub = img["subfolder"].as_str().unwrap_or("");
                paths.push(if sub.is_empty() { name.to_string() } else { format!("{}/{}", sub, name) });
            }
        }
        for (key, val) in obj {
            if matches!(key.as_str(), "glb_path" | "file_path" | "mesh_path" | "images") {
                continue;
            }
            match val {
                Value::String(s) if is_mesh(s) => paths.push(s.clone()),
                Value::Array(arr) => paths.extend(
                    arr.iter().filter_map(|v| v.as_str()).filter(|s| is_mesh(s)).map(String::from),
                ),
                _ => {}
            }
        }
    }
    paths
}
