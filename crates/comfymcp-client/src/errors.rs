//! Client error type and ComfyUI error-message parsing

use serde_json::Value;

/// Result type for ComfyUI operations
pub type ClientResult<T> = Result<T, ClientError>;

/// ComfyUI client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("ComfyUI is not responding at {0}. Ensure ComfyUI is running.")]
    Unavailable(String),

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Execution(String),

    #[error("workflow {prompt_id} timed out after {secs} seconds. Increase COMFY_MCP_GENERATION_TIMEOUT for slow models.")]
    Timeout { prompt_id: String, secs: u64 },

    #[error("no outputs matched preferred keys {preferred:?}. Available: {available}")]
    NoOutputs { preferred: Vec<String>, available: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl From<ClientError> for comfymcp_core::Error {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Credential(msg) => comfymcp_core::Error::credential("keyring", msg),
            other => comfymcp_core::Error::ComfyUi(other.to_string()),
        }
    }
}

const VRAM_ADVICE: &str = "VRAM Error: GPU ran out of memory. Try:\n  \
     - Reducing image/video resolution\n  \
     - Reducing batch size or frame count\n  \
     - Starting ComfyUI with --lowvram or --medvram flag\n  \
     - Closing other GPU applications";

/// Turn a ComfyUI `error` object into a human-readable message.
///
/// Non-object values are stringified as-is.
pub fn parse_comfyui_error(error_info: &Value) -> String {
    let Some(obj) = error_info.as_object() else {
        return match error_info {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
    };

    let error_type = obj.get("type").and_then(Value::as_str).unwrap_or("");
    let message = obj.get("message").and_then(Value::as_str).unwrap_or("");
    let details = obj.get("details").and_then(Value::as_str).unwrap_or("");
    let error_str = format!("{} {}", message, details).to_lowercase();

    if error_str.contains("out of memory") || has_word(&error_str, "oom") {
        return VRAM_ADVICE.to_string();
    }

    if error_type.contains("value_not_in_list") || error_str.contains("value_not_in_list") {
        let mut missing = Vec::new();
        if let Some(node_errors) = obj
            .get("extra_info")
            .and_then(|e| e.get("node_errors"))
            .and_then(Value::as_object)
        {
            for (node_id, errors) in node_errors {
                for err in errors["errors"].as_array().into_iter().flatten() {
                    if err["type"].as_str() == Some("value_not_in_list") {
                        missing.push(format!("Node {}: value not found", node_id));
                    }
                }
            }
        }
        if !missing.is_empty() {
            return format!(
                "Missing model or value: {}. Check that required models are installed.",
                missing.join("; ")
            );
        }
        return "Missing model or configuration value. Verify ComfyUI has required models installed."
            .to_string();
    }

    if error_str.contains("missing") && (error_str.contains("node") || error_str.contains("class_type")) {
        return format!(
            "Missing ComfyUI node: {}. Install the required custom node package.",
            message
        );
    }

    if error_str.contains("connection") || error_str.contains("refused") {
        return "Connection error: Cannot reach ComfyUI. Ensure ComfyUI is running.".to_string();
    }

    if error_str.contains("timeout") {
        return "Timeout: ComfyUI took too long to respond. The model may be loading or generation is slow."
            .to_string();
    }

    if message.is_empty() {
        error_info.to_string()
    } else {
        message.to_string()
    }
}

/// Parse the payload of an `execution_error` status message.
pub fn parse_execution_error(msg_data: &Value) -> String {
    let exception = msg_data["exception_message"].as_str().unwrap_or("");
    let node_type = msg_data["node_type"].as_str().unwrap_or("unknown node");

    let lower = exception.to_lowercase();
    if lower.contains("out of memory") || lower.contains("cuda") {
        return "VRAM Error: GPU ran out of memory. Try:\n  \
                - Reducing image/video resolution\n  \
                - Starting ComfyUI with --lowvram flag"
            .to_string();
    }
    if exception.contains("FP8") || exception.contains("GGUF") {
        return format!("Model compatibility error: {}", exception);
    }
    format!("Workflow failed at {}: {}", node_type, exception)
}

/// Collect `node_errors` from a rejected `/prompt` response, if any.
pub fn node_errors_message(error_data: &Value) -> Option<String> {
    let node_errors = error_data.get("node_errors")?.as_object()?;
    let mut msgs = Vec::new();
    for (node_id, node_err) in node_errors {
        for err in node_err["errors"].as_array().into_iter().flatten() {
            let detail = err["message"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| err.to_string());
            msgs.push(format!("Node {}: {}", node_id, detail));
        }
    }
    if msgs.is_empty() {
        None
    } else {
        Some(format!("Workflow validation failed:\n{}", msgs.join("\n")))
    }
}

fn has_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|w| w == word)
}
