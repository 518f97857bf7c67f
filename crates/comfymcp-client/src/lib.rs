//! comfymcp client - ComfyUI REST/WebSocket access and credential storage

pub mod comfyui;
pub mod credentials;
pub mod errors;
pub mod monitor;

pub use comfyui::{ComfyClient, ConnectionStatus, JobState, JobStatus, QueueInfo, RunOutput};
pub use credentials::CredentialStore;
pub use errors::{ClientError, ClientResult};
pub use monitor::{ProgressEvent, ProgressKind, ProgressMonitor};
