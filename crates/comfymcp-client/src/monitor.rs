//! Live execution progress from ComfyUI's WebSocket
//!
//! Connects to `ws://<host>/ws?clientId=<id>` and turns ComfyUI's execution
//! messages into `ProgressEvent`s fanned out on a broadcast channel.

use crate::errors::{ClientError, ClientResult};
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Start,
    NodeStart,
    Progress,
    NodeComplete,
    Cached,
    Complete,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub kind: ProgressKind,
    pub prompt_id: Option<String>,
    pub node: Option<String>,
    pub value: Option<u64>,
    pub max: Option<u64>,
    pub percent: f64,
    pub message: String,
}

impl ProgressEvent {
    fn new(kind: ProgressKind, prompt_id: Option<String>, percent: f64, message: String) -> Self {
        Self {
            kind,
            prompt_id,
            node: None,
            value: None,
            max: None,
            percent,
            message,
        }
    }
}

/// Per-prompt node progress. Reset on every `execution_start`.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    current_prompt: Option<String>,
    nodes: HashMap<String, (u64, u64)>,
}

impl ProgressTracker {
    pub fn current_prompt(&self) -> Option<&str> {
        self.current_prompt.as_deref()
    }

    /// Mean of value/max across nodes that reported progress, as a percentage.
    pub fn overall_percent(&self) -> f64 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .nodes
            .values()
            .map(|&(v, m)| if m > 0 { v as f64 / m as f64 } else { 0.0 })
            .sum();
        total / self.nodes.len() as f64 * 100.0
    }

    /// Translate one ComfyUI message. Unknown types yield `None`.
    pub fn handle(&mut self, msg: &Value) -> Option<ProgressEvent> {
        let data = &msg["data"];
        let prompt_id = data["prompt_id"].as_str().map(String::from);
        let node = match &data["node"] {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        };

        match msg["type"].as_str()? {
            "execution_start" => {
                self.current_prompt = prompt_id.clone();
                self.nodes.clear();
                Some(ProgressEvent::new(ProgressKind::Start, prompt_id, 0.0, "Starting execution...".into()))
            }
            "executing" => match node {
                None => Some(ProgressEvent::new(ProgressKind::Complete, prompt_id, 100.0, "Execution complete!".into())),
                Some(node) => {
                    let mut ev = ProgressEvent::new(
                        ProgressKind::NodeStart,
                        prompt_id,
                        self.overall_percent(),
                        format!("Executing node {}...", node),
                    );
                    ev.node = Some(node);
                    Some(ev)
                }
            },
            "progress" => {
                let value = data["value"].as_u64().unwrap_or(0);
                let max = data["max"].as_u64().unwrap_or(100);
                let node = node.unwrap_or_default();
                self.nodes.insert(node.clone(), (value, max));
                let pct = if max > 0 { value as f64 / max as f64 * 100.0 } else { 0.0 };
                let mut ev = ProgressEvent::new(
                    ProgressKind::Progress,
                    prompt_id,
                    pct,
                    format!("Node {}: {}/{} ({:.1}%)", node, value, max, pct),
                );
                ev.node = Some(node);
                ev.value = Some(value);
                ev.max = Some(max);
                Some(ev)
            }
            "executed" => {
                let label = node.clone().unwrap_or_default();
                let mut ev = ProgressEvent::new(
                    ProgressKind::NodeComplete,
                    prompt_id,
                    self.overall_percent(),
                    format!("Node {} complete", label),
                );
                ev.node = node;
                Some(ev)
            }
            "execution_cached" => {
                let count = data["nodes"].as_array().map(|a| a.len()).unwrap_or(0);
                Some(ProgressEvent::new(
                    ProgressKind::Cached,
                    prompt_id,
                    self.overall_percent(),
                    format!("Using cached results for {} nodes", count),
                ))
            }
            "execution_error" => {
                let err = data["exception_message"].as_str().unwrap_or("Unknown error");
                Some(ProgressEvent::new(ProgressKind::Error, prompt_id, 0.0, format!("Error: {}", err)))
            }
            _ => None,
        }
    }
}

pub struct ProgressMonitor {
    ws_url: String,
    tx: broadcast::Sender<ProgressEvent>,
    tracker: Mutex<ProgressTracker>,
}

impl ProgressMonitor {
    pub fn new(base_url: &str, client_id: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        let (tx, _) = broadcast::channel(256);
        Self {
            ws_url: format!("{}/ws?clientId={}", ws_base, client_id),
            tx,
            tracker: Mutex::new(ProgressTracker::default()),
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Feed one raw text frame through the tracker and broadcast the result.
    pub fn ingest(&self, text: &str) -> Option<ProgressEvent> {
        let msg: Value = serde_json::from_str(text).ok()?;
        let event = self.tracker.lock().ok()?.handle(&msg)?;
        // No subscribers is fine.
        let _ = self.tx.send(event.clone());
        Some(event)
    }

    /// Connect and pump frames in a background task until the socket closes.
    pub async fn connect(self: Arc<Self>) -> ClientResult<JoinHandle<()>> {
        let (ws_stream, _) = connect_async(&self.ws_url)
            .await
            .map_err(|e| ClientError::RequestFailed(format!("WebSocket connect to {} failed: {}", self.ws_url, e)))?;
        info!("Progress monitor connected to {}", self.ws_url);

        let (_, mut rx) = ws_stream.split();
        let monitor = self.clone();
        Ok(tokio::spawn(async move {
            while let Some(frame) = rx.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if let Some(ev) = monitor.ingest(&text) {
                            debug!("progress {:?} {:.1}% {}", ev.kind, ev.percent, ev.message);
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Progress monitor error: {}", e);
                        break;
                    }
                }
            }
            info!("Progress monitor disconnected");
        }))
    }
}
