//! Workflow engine errors

pub type WorkflowResult<T> = Result<T, WorkflowError>;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow '{0}' not found")]
    NotFound(String),

    #[error("{0}")]
    InvalidParams(String),

    #[error("invalid workflow {workflow}: {message}")]
    Invalid { workflow: String, message: String },

    #[error("defaults: {0}")]
    Defaults(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<WorkflowError> for comfymcp_core::Error {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::NotFound(id) => comfymcp_core::Error::NotFound(format!("Workflow '{}' not found", id)),
            WorkflowError::InvalidParams(msg) => comfymcp_core::Error::InvalidParams(msg),
            WorkflowError::Invalid { workflow, message } => comfymcp_core::Error::workflow(workflow, message),
            WorkflowError::Defaults(msg) => comfymcp_core::Error::Config(msg),
            WorkflowError::Io(e) => comfymcp_core::Error::Io(e),
            WorkflowError::Json(e) => comfymcp_core::Error::Json(e),
        }
    }
}
