//! Core types for comfymcp

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Defaults namespace a workflow draws its fallback values from.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Namespace {
    #[serde(rename = "image")]
    Image,
    #[serde(rename = "audio")]
    Audio,
    #[serde(rename = "video")]
    Video,
    #[serde(rename = "3d")]
    ThreeD,
}

impl Namespace {
    pub const ALL: [Namespace; 4] = [
        Namespace::Image,
        Namespace::Audio,
        Namespace::Video,
        Namespace::ThreeD,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Image => "image",
            Namespace::Audio => "audio",
            Namespace::Video => "video",
            Namespace::ThreeD => "3d",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "image" => Ok(Namespace::Image),
            "audio" => Ok(Namespace::Audio),
            "video" => Ok(Namespace::Video),
            "3d" => Ok(Namespace::ThreeD),
            other => Err(crate::Error::InvalidParams(format!(
                "Invalid namespace: {}. Must be one of image, audio, video, 3d",
                other
            ))),
        }
    }
}

/// Gateway configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub bind: BindMode,
    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_port() -> u16 {
    9000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: BindMode::default(),
            auth: AuthConfig::default(),
        }
    }
}

/// Bind mode for the gateway
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    #[default]
    Loopback,
    Lan,
}

impl BindMode {
    pub fn to_addr(&self) -> &str {
        match self {
            BindMode::Loopback => "127.0.0.1",
            BindMode::Lan => "0.0.0.0",
        }
    }
}

/// Authentication configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    pub token: Option<String>,
}

/// Authentication mode
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Token,
    #[default]
    None,
}

/// Order for ComfyUI node ids: numeric ids numerically, everything else
/// lexically after them.
pub fn compare_node_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Entries of a node map in `compare_node_ids` order.
pub fn nodes_in_order(nodes: &serde_json::Map<String, serde_json::Value>) -> Vec<(&String, &serde_json::Value)> {
    let mut ordered: Vec<_> = nodes.iter().collect();
    ordered.sort_by(|(a, _), (b, _)| compare_node_ids(a, b));
    ordered
}
