//! Copy generated assets into a web project's static directory
//!
//! Every publish is confined to a single publish root. Target filenames are
//! restricted to a conservative lowercase pattern, and the resolved
//! destination must canonicalise inside the root before anything is written.

use crate::registry::AssetRecord;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{OnceLock, RwLock};
use tracing::{info, warn};

pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif", "mp4", "webm", "wav", "mp3", "flac", "glb"];

/// Project subdirectories probed, in order, when no publish dir is configured.
const AUTO_ROOTS: &[&str] = &["public", "static", "assets"];

const MANIFEST_FILE: &str = "manifest.json";

fn filename_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9._-]{0,63}\.(png|jpg|jpeg|webp|gif|mp4|webm|wav|mp3|flac|glb)$")
            .expect("static regex")
    })
}

fn manifest_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{0,54}$").expect("static regex"))
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("No publish directory configured. Call set_publish_dir or create public/, static/ or assets/ in the project root.")]
    NoPublishDir,

    #[error("Invalid target filename '{0}': must match [a-z0-9][a-z0-9._-]* with an allowed media extension")]
    InvalidFilename(String),

    #[error("Invalid manifest key '{0}': use lowercase letters, digits, '-' and '_' (max 55 chars)")]
    InvalidManifestKey(String),

    #[error("Either target_filename or manifest_key is required")]
    MissingTarget,

    #[error("Extension mismatch: source is .{source_ext}, target is .{target_ext}")]
    ExtensionMismatch { source_ext: String, target_ext: String },

    #[error("Source file not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Destination escapes publish root: {0}")]
    OutsideRoot(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl From<PublishError> for comfymcp_core::Error {
    fn from(e: PublishError) -> Self {
        match e {
            PublishError::NoPublishDir
            | PublishError::InvalidFilename(_)
            | PublishError::InvalidManifestKey(_)
            | PublishError::MissingTarget
            | PublishError::ExtensionMismatch { .. } => comfymcp_core::Error::InvalidParams(e.to_string()),
            other => comfymcp_core::Error::Publish(other.to_string()),
        }
    }
}

/// Where the publish root came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RootSource {
    Configured,
    AutoDetected,
    Unset,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishResult {
    pub dest_path: PathBuf,
    pub filename: String,
    pub bytes: u64,
    pub manifest_key: Option<String>,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishInfo {
    pub publish_root: Option<PathBuf>,
    pub source: RootSource,
    pub writable: bool,
    pub manifest: Map<String, Value>,
}

pub struct PublishManager {
    project_root: PathBuf,
    configured: RwLock<Option<PathBuf>>,
}

impl PublishManager {
    pub fn new(configured: Option<PathBuf>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            configured: RwLock::new(configured),
        }
    }

    /// Effective root and where it came from.
    pub fn root(&self) -> (Option<PathBuf>, RootSource) {
        let configured = self.configured.read().map(|c| c.clone()).unwrap_or_default();
        if let Some(dir) = configured {
            return (Some(dir), RootSource::Configured);
        }
        for sub in AUTO_ROOTS {
            let candidate = self.project_root.join(sub);
            if candidate.is_dir() {
                return (Some(candidate.join("gen")), RootSource::AutoDetected);
            }
        }
        (None, RootSource::Unset)
    }

    /// Configure the publish root explicitly. The directory is created.
    pub fn set_root(&self, dir: &Path) -> Result<PathBuf, PublishError> {
        std::fs::create_dir_all(dir)?;
        let canonical = dir.canonicalize()?;
        if let Ok(mut guard) = self.configured.write() {
            *guard = Some(canonical.clone());
        }
        info!("Publish root set to {}", canonical.display());
        Ok(canonical)
    }

    pub fn info(&self) -> PublishInfo {
        let (root, source) = self.root();
        let writable = root.as_deref().is_some_and(is_writable);
        let manifest = root.as_deref().map(read_manifest).unwrap_or_default();
        PublishInfo {
            publish_root: root,
            source,
            writable,
            manifest,
        }
    }

    /// Copy a local file into the publish root.
    pub fn publish(
        &self,
        record: &AssetRecord,
        source_path: &Path,
        target_filename: Option<&str>,
        manifest_key: Option<&str>,
    ) -> Result<PublishResult, PublishError> {
        if !source_path.is_file() {
            return Err(PublishError::SourceNotFound(source_path.to_path_buf()));
        }
        let (dest, filename) = self.prepare(record, target_filename, manifest_key)?;
        let bytes = std::fs::copy(source_path, &dest)?;
        self.finish(dest, filename, bytes, manifest_key)
    }

    /// Write already-fetched bytes into the publish root.
    pub fn publish_bytes(
        &self,
        record: &AssetRecord,
        data: &[u8],
        target_filename: Option<&str>,
        manifest_key: Option<&str>,
    ) -> Result<PublishResult, PublishError> {
        let (dest, filename) = self.prepare(record, target_filename, manifest_key)?;
        std::fs::write(&dest, data)?;
        self.finish(dest, filename, data.len() as u64, manifest_key)
    }

    fn prepare(
        &self,
        record: &AssetRecord,
        target_filename: Option<&str>,
        manifest_key: Option<&str>,
    ) -> Result<(PathBuf, String), PublishError> {
        if let Some(key) = manifest_key {
            if !manifest_key_re().is_match(key) {
                return Err(PublishError::InvalidManifestKey(key.to_string()));
            }
        }

        let source_ext = extension_of(&record.filename);
        let filename = match (target_filename, manifest_key) {
            (Some(name), _) => name.to_string(),
            (None, Some(key)) => {
                let short: String = record.asset_id.chars().filter(|c| c.is_ascii_alphanumeric()).take(8).collect();
                format!("{}_{}.{}", key, short.to_lowercase(), source_ext)
            }
            (None, None) => return Err(PublishError::MissingTarget),
        };

        if filename.contains("..") || filename.contains('/') || filename.contains('\\') || !filename_re().is_match(&filename) {
            return Err(PublishError::InvalidFilename(filename));
        }
        let target_ext = extension_of(&filename);
        if !extensions_compatible(&source_ext, &target_ext) {
            return Err(PublishError::ExtensionMismatch {
                source_ext,
                target_ext,
            });
        }

        let (root, _) = self.root();
        let root = root.ok_or(PublishError::NoPublishDir)?;
        std::fs::create_dir_all(&root)?;
        let root = root.canonicalize()?;

        let dest = root.join(&filename);
        let parent = dest
            .parent()
            .map(Path::canonicalize)
            .transpose()?
            .ok_or_else(|| PublishError::OutsideRoot(dest.clone()))?;
        if parent != root {
            return Err(PublishError::OutsideRoot(dest));
        }
        if dest.exists() {
            let resolved = dest.canonicalize()?;
            if !resolved.starts_with(&root) {
                warn!("Refusing to overwrite {} which resolves to {}", dest.display(), resolved.display());
                return Err(PublishError::OutsideRoot(resolved));
            }
        }
        Ok((dest, filename))
    }

    fn finish(
        &self,
        dest: PathBuf,
        filename: String,
        bytes: u64,
        manifest_key: Option<&str>,
    ) -> Result<PublishResult, PublishError> {
        if let Some(key) = manifest_key {
            if let Some(root) = dest.parent() {
                let mut manifest = read_manifest(root);
                manifest.insert(key.to_string(), Value::String(filename.clone()));
                std::fs::write(root.join(MANIFEST_FILE), serde_json::to_string_pretty(&manifest)?)?;
            }
        }
        info!("Published {} ({} bytes)", dest.display(), bytes);
        Ok(PublishResult {
            dest_path: dest,
            filename,
            bytes,
            manifest_key: manifest_key.map(String::from),
            published_at: Utc::now(),
        })
    }
}

fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

fn extensions_compatible(source: &str, target: &str) -> bool {
    let norm = |e: &str| if e == "jpeg" { "jpg".to_string() } else { e.to_string() };
    norm(source) == norm(target)
}

fn read_manifest(root: &Path) -> Map<String, Value> {
    std::fs::read_to_string(root.join(MANIFEST_FILE))
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn is_writable(dir: &Path) -> bool {
    let probe_dir = if dir.exists() {
        dir.to_path_buf()
    } else {
        match dir.parent() {
            Some(p) if p.exists() => p.to_path_buf(),
            _ => return false,
        }
    };
    std::fs::metadata(&probe_dir)
        .map(|m| m.is_dir() && !m.permissions().readonly())
        .unwrap_or(false)
}
