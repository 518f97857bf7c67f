//! Error types for comfymcp

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("workflow error: {workflow} - {message}")]
    Workflow { workflow: String, message: String },

    #[error("comfyui error: {0}")]
    ComfyUi(String),

    #[error("webhook error: {0}")]
    Webhook(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("credential error: {service} - {message}")]
    Credential { service: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::AuthFailed(msg.into())
    }

    pub fn workflow(workflow: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Workflow {
            workflow: workflow.into(),
            message: message.into(),
        }
    }

    pub fn credential(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Credential {
            service: service.into(),
            message: message.into(),
        }
    }

    /// JSON-RPC error code used when this error escapes to an MCP client.
    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::InvalidParams(_) => crate::protocol::INVALID_PARAMS,
            Self::NotFound(_) => crate::protocol::INVALID_PARAMS,
            Self::AuthFailed(_) => crate::protocol::UNAUTHORIZED,
            _ => crate::protocol::INTERNAL_ERROR,
        }
    }
}
