//! Webhook subscriptions and delivery
//!
//! Subscribers register a URL plus the events they care about. `dispatch`
//! fans an event out to every active subscriber on its own task; each delivery
//! retries with exponential backoff and lands in a bounded log.

use crate::signing::{sign, SIGNATURE_HEADER};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, VecDeque};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const MAX_LOG_ENTRIES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEvent {
    GenerationCompleted,
    AssetPublished,
    JobFailed,
    JobStarted,
    JobCancelled,
}

impl WebhookEvent {
    pub const ALL: [WebhookEvent; 5] = [
        WebhookEvent::GenerationCompleted,
        WebhookEvent::AssetPublished,
        WebhookEvent::JobFailed,
        WebhookEvent::JobStarted,
        WebhookEvent::JobCancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEvent::GenerationCompleted => "generation_completed",
            WebhookEvent::AssetPublished => "asset_published",
            WebhookEvent::JobFailed => "job_failed",
            WebhookEvent::JobStarted => "job_started",
            WebhookEvent::JobCancelled => "job_cancelled",
        }
    }

    /// Parse a list of event names. Empty means every event.
    pub fn parse_list(names: &[String]) -> Result<BTreeSet<WebhookEvent>, WebhookError> {
        if names.is_empty() {
            return Ok(Self::ALL.into_iter().collect());
        }
        let mut invalid = Vec::new();
        let mut events = BTreeSet::new();
        for name in names {
            match name.parse() {
                Ok(e) => {
                    events.insert(e);
                }
                Err(_) => invalid.push(name.clone()),
            }
        }
        if invalid.is_empty() {
            Ok(events)
        } else {
            Err(WebhookError::InvalidEvents(invalid))
        }
    }
}

impl FromStr for WebhookEvent {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| WebhookError::InvalidEvents(vec![s.to_string()]))
    }
}

impl std::fmt::Display for WebhookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Invalid webhook URL '{0}': must be an http:// or https:// URL with a host")]
    InvalidUrl(String),

    #[error("Invalid events: {}. Supported: {}", .0.join(", "), supported_list())]
    InvalidEvents(Vec<String>),

    #[error("Webhook not found: {0}")]
    NotFound(String),
}

fn supported_list() -> String {
    WebhookEvent::ALL.iter().map(|e| e.as_str()).collect::<Vec<_>>().join(", ")
}

impl From<WebhookError> for comfymcp_core::Error {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::InvalidUrl(_) | WebhookError::InvalidEvents(_) => {
                comfymcp_core::Error::InvalidParams(e.to_string())
            }
            WebhookError::NotFound(id) => comfymcp_core::Error::NotFound(format!("webhook {}", id)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub webhook_id: String,
    pub url: String,
    pub events: BTreeSet<WebhookEvent>,
    pub secret: Option<String>,
    pub created_at: DateTime<Utc>,
    pub active: bool,
    pub metadata: Map<String, Value>,
}

impl WebhookConfig {
    pub fn view(&self) -> WebhookView {
        WebhookView {
            webhook_id: self.webhook_id.clone(),
            url: self.url.clone(),
            events: self.events.iter().copied().collect(),
            active: self.active,
            created_at: self.created_at,
            has_secret: self.secret.is_some(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Public shape of a subscription. The secret never leaves the manager.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookView {
    pub webhook_id: String,
    pub url: String,
    pub events: Vec<WebhookEvent>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub has_secret: bool,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryRecord {
    pub delivery_id: String,
    pub webhook_id: String,
    pub event: WebhookEvent,
    pub timestamp: DateTime<Utc>,
    pub status_code: Option<u16>,
    pub success: bool,
    pub error: Option<String>,
    pub retry_count: u32,
    pub response_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Shared delivery state, cloned into each spawned task.
#[derive(Clone)]
struct Deliverer {
    http: reqwest::Client,
    policy: RetryPolicy,
    log: Arc<Mutex<VecDeque<DeliveryRecord>>>,
    max_log: usize,
}

pub struct WebhookManager {
    webhooks: DashMap<String, WebhookConfig>,
    deliverer: Deliverer,
}

impl Default for WebhookManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookManager {
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default())
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self::with_limits(policy, MAX_LOG_ENTRIES)
    }

    pub fn with_limits(policy: RetryPolicy, max_log: usize) -> Self {
        Self {
            webhooks: DashMap::new(),
            deliverer: Deliverer {
                http: reqwest::Client::new(),
                policy,
                log: Arc::new(Mutex::new(VecDeque::new())),
                max_log,
            },
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.deliverer.policy
    }

    pub fn register(
        &self,
        url: &str,
        events: &[String],
        secret: Option<String>,
        metadata: Map<String, Value>,
    ) -> Result<WebhookView, WebhookError> {
        let valid = url::Url::parse(url)
            .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
            .unwrap_or(false);
        if !valid {
            return Err(WebhookError::InvalidUrl(url.to_string()));
        }
        let events = WebhookEvent::parse_list(events)?;

        let config = WebhookConfig {
            webhook_id: uuid::Uuid::new_v4().to_string(),
            url: url.to_string(),
            events,
            secret: secret.filter(|s| !s.is_empty()),
            created_at: Utc::now(),
            active: true,
            metadata,
        };
        let view = config.view();
        info!(
            "Registered webhook {} -> {} ({} events)",
            config.webhook_id,
            config.url,
            config.events.len()
        );
        self.webhooks.insert(config.webhook_id.clone(), config);
        Ok(view)
    }

    pub fn unregister(&self, webhook_id: &str) -> bool {
        let removed = self.webhooks.remove(webhook_id).is_some();
        if removed {
            info!("Unregistered webhook {}", webhook_id);
        }
        removed
    }

    pub fn get(&self, webhook_id: &str) -> Option<WebhookView> {
        self.webhooks.get(webhook_id).map(|w| w.view())
    }

    /// Subscriptions ordered by creation time.
    pub fn list(&self) -> Vec<WebhookView> {
        let mut views: Vec<WebhookView> = self.webhooks.iter().map(|w| w.view()).collect();
        views.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.webhook_id.cmp(&b.webhook_id)));
        views
    }

    pub fn len(&self) -> usize {
        self.webhooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.webhooks.is_empty()
    }

    pub fn set_active(&self, webhook_id: &str, active: bool) -> Result<WebhookView, WebhookError> {
        let mut entry = self
            .webhooks
            .get_mut(webhook_id)
            .ok_or_else(|| WebhookError::NotFound(webhook_id.to_string()))?;
        entry.active = active;
        info!("Webhook {} {}", webhook_id, if active { "activated" } else { "deactivated" });
        Ok(entry.view())
    }

    pub fn update_events(&self, webhook_id: &str, events: &[String]) -> Result<WebhookView, WebhookError> {
        let events = WebhookEvent::parse_list(events)?;
        let mut entry = self
            .webhooks
            .get_mut(webhook_id)
            .ok_or_else(|| WebhookError::NotFound(webhook_id.to_string()))?;
        entry.events = events;
        Ok(entry.view())
    }

    /// Fan `payload` out to every active subscriber of `event`. Returns the
    /// ids notified; deliveries run in the background.
    pub fn dispatch(&self, event: &str, payload: Value) -> Vec<String> {
        self.spawn_deliveries(event, payload).into_iter().map(|(id, _)| id).collect()
    }

    /// Like `dispatch`, but hands back the delivery tasks.
    pub fn dispatch_tracked(&self, event: &str, payload: Value) -> Vec<(String, JoinHandle<DeliveryRecord>)> {
        self.spawn_deliveries(event, payload)
    }

    fn spawn_deliveries(&self, event: &str, payload: Value) -> Vec<(String, JoinHandle<DeliveryRecord>)> {
        let event = match WebhookEvent::from_str(event) {
            Ok(e) => e,
            Err(_) => {
                warn!("Dispatch of unknown webhook event '{}' ignored", event);
                return Vec::new();
            }
        };

        let targets: Vec<WebhookConfig> = self
            .webhooks
            .iter()
            .filter(|w| w.active && w.events.contains(&event))
            .map(|w| w.clone())
            .collect();
        if targets.is_empty() {
            debug!("No subscribers for {}", event);
            return Vec::new();
        }

        debug!("Dispatching {} to {} webhooks", event, targets.len());
        targets
            .into_iter()
            .map(|config| {
                let deliverer = self.deliverer.clone();
                let payload = payload.clone();
                let id = config.webhook_id.clone();
                let handle = tokio::spawn(async move { deliverer.deliver(&config, event, &payload).await });
                (id, handle)
            })
            .collect()
    }

    /// Deliver one event to one subscriber now, retrying per policy.
    pub async fn deliver(&self, webhook_id: &str, event: WebhookEvent, payload: &Value) -> Result<DeliveryRecord, WebhookError> {
        let config = self
            .webhooks
            .get(webhook_id)
            .map(|w| w.clone())
            .ok_or_else(|| WebhookError::NotFound(webhook_id.to_string()))?;
        Ok(self.deliverer.deliver(&config, event, payload).await)
    }

    /// Newest first, optionally filtered.
    pub fn delivery_log(&self, webhook_id: Option<&str>, event: Option<WebhookEvent>, limit: usize) -> Vec<DeliveryRecord> {
        let log = self.deliverer.log.lock().unwrap_or_else(|p| p.into_inner());
        log.iter()
            .rev()
            .filter(|r| webhook_id.map_or(true, |id| r.webhook_id == id))
            .filter(|r| event.map_or(true, |e| r.event == e))
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Deliverer {
    async fn deliver(&self, config: &WebhookConfig, event: WebhookEvent, payload: &Value) -> DeliveryRecord {
        let delivery_id = uuid::Uuid::new_v4().to_string();
        let body = json!({
            "event": event,
            "timestamp": Utc::now().to_rfc3339(),
            "webhook_id": config.webhook_id,
            "data": payload,
        });
        let body = serde_json::to_vec(&body).unwrap_or_default();

        let mut delay = self.policy.initial_delay;
        let mut record = DeliveryRecord {
            delivery_id: delivery_id.clone(),
            webhook_id: config.webhook_id.clone(),
            event,
            timestamp: Utc::now(),
            status_code: None,
            success: false,
            error: None,
            retry_count: 0,
            response_time_ms: None,
        };

        for attempt in 0..=self.policy.max_retries {
            record.retry_count = attempt;
            record.timestamp = Utc::now();
            let started = Instant::now();
            let outcome = self.send(config, event, &delivery_id, &body).await;
            record.response_time_ms = Some(started.elapsed().as_millis() as u64);

            match outcome {
                Ok((status, _)) if (200..300).contains(&status) => {
                    record.status_code = Some(status);
                    record.success = true;
                    record.error = None;
                    debug!("Webhook {} accepted {} ({})", config.webhook_id, event, status);
                    break;
                }
                Ok((status, text)) => {
                    record.status_code = Some(status);
                    record.error = Some(format!("HTTP {}: {}", status, text));
                }
                Err(message) => {
                    record.status_code = None;
                    record.error = Some(message);
                }
            }

            if attempt < self.policy.max_retries {
                debug!(
                    "Webhook {} attempt {} failed: {:?}; retrying in {:?}",
                    config.webhook_id,
                    attempt + 1,
                    record.error,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(self.policy.max_delay);
            }
        }

        if !record.success {
            warn!(
                "Webhook {} delivery of {} failed after {} attempts: {}",
                config.webhook_id,
                event,
                record.retry_count + 1,
                record.error.as_deref().unwrap_or("unknown error")
            );
        }
        self.append(record.clone());
        record
    }

    /// One HTTP attempt. Ok((status, body prefix)) for any response; Err for
    /// transport failure.
    async fn send(
        &self,
        config: &WebhookConfig,
        event: WebhookEvent,
        delivery_id: &str,
        body: &[u8],
    ) -> Result<(u16, String), String> {
        let mut req = self
            .http
            .post(&config.url)
            .timeout(self.policy.timeout)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Event", event.as_str())
            .header("X-Webhook-Id", &config.webhook_id)
            .header("X-Delivery-Id", delivery_id);
        if let Some(secret) = &config.secret {
            req = req.header(SIGNATURE_HEADER, format!("sha256={}", sign(secret, body)));
        }

        match req.body(body.to_vec()).send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let text = resp.text().await.unwrap_or_default();
                Ok((status, text.chars().take(200).collect()))
            }
            Err(e) if e.is_timeout() => Err("Request timed out".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    fn append(&self, record: DeliveryRecord) {
        let mut log = self.log.lock().unwrap_or_else(|p| p.into_inner());
        log.push_back(record);
        while log.len() > self.max_log {
            log.pop_front();
        }
    }
}
