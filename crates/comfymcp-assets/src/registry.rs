//! In-memory registry of generated assets with TTL expiry
//!
//! Assets are identified by `(folder_type, subfolder, filename)` rather than by
//! URL, so records survive ComfyUI host or port changes.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct AssetRecord {
    pub asset_id: String,
    pub filename: String,
    pub subfolder: String,
    pub folder_type: String,
    pub prompt_id: String,
    pub workflow_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub mime_type: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bytes_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comfy_history: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_workflow: Option<Value>,
    pub metadata: Map<String, Value>,
    pub session_id: Option<String>,
}

impl AssetRecord {
    pub fn asset_url(&self, base_url: &str) -> String {
        comfymcp_client::comfyui::view_url(base_url, &self.filename, &self.subfolder, &self.folder_type)
    }

    pub fn identity_key(&self) -> String {
        identity_key(&self.filename, &self.subfolder, &self.folder_type)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Fields supplied when registering an asset.
#[derive(Debug, Clone, Default)]
pub struct NewAsset {
    pub filename: String,
    pub subfolder: String,
    pub folder_type: String,
    pub workflow_id: String,
    pub prompt_id: String,
    pub mime_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bytes_size: Option<u64>,
    pub comfy_history: Option<Value>,
    pub submitted_workflow: Option<Value>,
    pub metadata: Map<String, Value>,
    pub session_id: Option<String>,
}

pub fn identity_key(filename: &str, subfolder: &str, folder_type: &str) -> String {
    format!("{}:{}:{}", folder_type, subfolder, filename)
}

#[derive(Default)]
struct Tables {
    assets: HashMap<String, AssetRecord>,
    by_identity: HashMap<String, String>,
}

impl Tables {
    fn remove(&mut self, asset_id: &str) {
        if let Some(r) = self.assets.remove(asset_id) {
            self.by_identity.remove(&r.identity_key());
        }
    }

    fn live(&mut self, asset_id: &str, now: DateTime<Utc>) -> Option<AssetRecord> {
        let expired = self.assets.get(asset_id)?.is_expired(now);
        if expired {
            self.remove(asset_id);
            return None;
        }
        self.assets.get(asset_id).cloned()
    }
}

pub struct AssetRegistry {
    ttl: Duration,
    base_url: String,
    tables: RwLock<Tables>,
}

impl AssetRegistry {
    pub fn new(ttl_hours: u64, base_url: impl Into<String>) -> Self {
        Self::with_ttl(Duration::hours(ttl_hours as i64), base_url)
    }

    pub fn with_ttl(ttl: Duration, base_url: impl Into<String>) -> Self {
        Self {
            ttl,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tables: RwLock::new(Tables::default()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn tables(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Register a generated asset. A live record with the same identity is
    /// returned (with history/workflow refreshed when given).
    pub fn register(&self, new: NewAsset) -> AssetRecord {
        let now = Utc::now();
        let key = identity_key(&new.filename, &new.subfolder, &new.folder_type);
        let mut t = self.tables();

        if let Some(existing_id) = t.by_identity.get(&key).cloned() {
            if t.live(&existing_id, now).is_some() {
                if let Some(existing) = t.assets.get_mut(&existing_id) {
                    if new.comfy_history.is_some() {
                        existing.comfy_history = new.comfy_history;
                    }
                    if new.submitted_workflow.is_some() {
                        existing.submitted_workflow = new.submitted_workflow;
                    }
                    debug!("Asset {} already registered as {}", key, existing_id);
                    return existing.clone();
                }
            }
        }

        let record = AssetRecord {
            asset_id: uuid::Uuid::new_v4().to_string(),
            filename: new.filename,
            subfolder: new.subfolder,
            folder_type: new.folder_type,
            prompt_id: new.prompt_id,
            workflow_id: new.workflow_id,
            created_at: now,
            expires_at: now + self.ttl,
            mime_type: new.mime_type.unwrap_or_else(|| "application/octet-stream".to_string()),
            width: new.width,
            height: new.height,
            bytes_size: new.bytes_size.unwrap_or(0),
            comfy_history: new.comfy_history,
            submitted_workflow: new.submitted_workflow,
            metadata: new.metadata,
            session_id: new.session_id,
        };
        t.by_identity.insert(key, record.asset_id.clone());
        t.assets.insert(record.asset_id.clone(), record.clone());
        info!("Registered asset {} ({})", record.asset_id, record.filename);
        record
    }

    /// Live record by id. Expired records are evicted on access.
    pub fn get(&self, asset_id: &str) -> Option<AssetRecord> {
        self.tables().live(asset_id, Utc::now())
    }

    pub fn get_by_identity(&self, filename: &str, subfolder: &str, folder_type: &str) -> Option<AssetRecord> {
        let mut t = self.tables();
        let id = t.by_identity.get(&identity_key(filename, subfolder, folder_type)).cloned()?;
        t.live(&id, Utc::now())
    }

    /// Newest first, after evicting expired records.
    pub fn list(&self, limit: usize, workflow_id: Option<&str>, session_id: Option<&str>) -> Vec<AssetRecord> {
        self.cleanup_expired();
        let t = self.tables();
        let mut records: Vec<AssetRecord> = t
            .assets
            .values()
            .filter(|a| workflow_id.map_or(true, |w| a.workflow_id == w))
            .filter(|a| session_id.map_or(true, |s| a.session_id.as_deref() == Some(s)))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        records
    }

    pub fn len(&self) -> usize {
        self.tables().assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict every expired record. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut t = self.tables();
        let expired: Vec<String> = t
            .assets
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.asset_id.clone())
            .collect();
        for id in &expired {
            t.remove(id);
        }
        if !expired.is_empty() {
            debug!("Evicted {} expired assets", expired.len());
        }
        expired.len()
    }

    /// File on disk for an asset, under `output_root` or a conventional
    /// ComfyUI output directory.
    pub fn local_path(&self, asset_id: &str, output_root: Option<&Path>) -> Option<PathBuf> {
        let record = self.get(asset_id)?;
        let base = match output_root {
            Some(root) => root.to_path_buf(),
            None => default_output_roots().into_iter().find(|p| p.exists())?,
        };

        if !record.subfolder.is_empty() {
            let nested = base.join(&record.subfolder).join(&record.filename);
            if nested.exists() {
                return Some(nested);
            }
        }
        let flat = base.join(&record.filename);
        flat.exists().then_some(flat)
    }
}

fn default_output_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Some(home) = dirs::home_dir() {
        roots.push(home.join("ComfyUI").join("output"));
    }
    roots.push(PathBuf::from("C:/ComfyUI/output"));
    roots.push(PathBuf::from("/opt/ComfyUI/output"));
    roots
}
