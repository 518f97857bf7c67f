//! PARAM_ placeholder grammar: scanning, type inference, coercion, substitution
//!
//! A placeholder is a string input value that is exactly a token like
//! `PARAM_PROMPT` or `PARAM_INT_STEPS`, found at
//! `graph[node_id]["inputs"][input_name]`. Anything else (including tokens
//! embedded in longer strings) is left alone.

pub use comfymcp_core::compare_node_ids;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::OnceLock;

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^PARAM_[A-Z0-9_]*$").expect("static regex"))
}

const INT_NAMES: &[&str] = &[
    "width", "height", "steps", "seed", "frames", "length", "fps", "seconds", "duration", "batch_size",
    "resolution",
];

const FLOAT_NAMES: &[&str] = &["cfg", "denoise", "strength", "guidance"];

/// Names that never have to be supplied by the caller.
pub const OPTIONAL_NAMES: &[&str] = &[
    "seed",
    "width",
    "height",
    "steps",
    "cfg",
    "sampler_name",
    "scheduler",
    "denoise",
    "negative_prompt",
    "model",
    "fps",
    "frames",
    "length",
    "seconds",
    "duration",
    "lyrics_strength",
    "lora_strength",
    "controlnet_strength",
    "resolution",
    "batch_size",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Int,
    Float,
    String,
    Bool,
}

impl ParamType {
    pub fn json_type(&self) -> &'static str {
        match self {
            ParamType::Int => "integer",
            ParamType::Float => "number",
            ParamType::String => "string",
            ParamType::Bool => "boolean",
        }
    }

    /// Type implied by a parameter name alone.
    pub fn infer(name: &str) -> ParamType {
        if INT_NAMES.contains(&name) {
            ParamType::Int
        } else if FLOAT_NAMES.contains(&name) || name.ends_with("_strength") {
            ParamType::Float
        } else {
            ParamType::String
        }
    }
}

/// Where one placeholder sits in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub node_id: String,
    pub input: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParameterSpec {
    pub name: String,
    pub param_type: ParamType,
    /// Set when a token carried an explicit type prefix.
    pub explicit_type: bool,
    pub required: bool,
    pub default: Option<Value>,
    pub bindings: Vec<Binding>,
}

impl ParameterSpec {
    pub fn description(&self) -> String {
        let places: Vec<String> = self
            .bindings
            .iter()
            .map(|b| format!("node {}.{}", b.node_id, b.input))
            .collect();
        format!("{} ({}), bound to {}", self.name, self.param_type.json_type(), places.join(", "))
    }
}

/// Result of splitting a token into its optional type prefix and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedToken {
    Param { explicit: Option<ParamType>, name: String },
    EmptyName,
}

/// Parse a string input value. `None` if it is not a placeholder at all.
pub fn parse_token(raw: &str) -> Option<ParsedToken> {
    if !token_re().is_match(raw) {
        return None;
    }
    let rest = &raw["PARAM_".len()..];

    const PREFIXES: &[(&str, ParamType)] = &[
        ("INT_", ParamType::Int),
        ("FLOAT_", ParamType::Float),
        ("STRING_", ParamType::String),
        ("STR_", ParamType::String),
        ("TEXT_", ParamType::String),
        ("BOOL_", ParamType::Bool),
    ];
    for (prefix, ty) in PREFIXES {
        if let Some(name) = rest.strip_prefix(prefix) {
            return Some(named(Some(*ty), name));
        }
    }
    // `PARAM_INT` and friends: prefix with nothing after it.
    if matches!(rest, "INT" | "FLOAT" | "STRING" | "STR" | "TEXT" | "BOOL") {
        return Some(ParsedToken::EmptyName);
    }
    Some(named(None, rest))
}

fn named(explicit: Option<ParamType>, name: &str) -> ParsedToken {
    let name = name.trim_matches('_').to_lowercase();
    if name.is_empty() {
        ParsedToken::EmptyName
    } else {
        ParsedToken::Param { explicit, name }
    }
}

pub fn is_placeholder(value: &Value) -> bool {
    value.as_str().is_some_and(|s| token_re().is_match(s))
}

/// Every (node_id, input, token) in scan order.
fn placeholders(graph: &Value) -> Vec<(String, String, String)> {
    let mut found = Vec::new();
    let Some(nodes) = graph.as_object() else {
        return found;
    };
    let mut ids: Vec<&String> = nodes.keys().collect();
    ids.sort_by(|a, b| compare_node_ids(a, b));

    for id in ids {
        let Some(inputs) = nodes[id.as_str()].get("inputs").and_then(Value::as_object) else {
            continue;
        };
        let mut names: Vec<&String> = inputs.keys().collect();
        names.sort();
        for input in names {
            if let Some(raw) = inputs[input.as_str()].as_str() {
                if token_re().is_match(raw) {
                    found.push((id.clone(), input.clone(), raw.to_string()));
                }
            }
        }
    }
    found
}

#[derive(Debug, Default)]
pub struct ScanResult {
    /// In order of first appearance.
    pub parameters: Vec<ParameterSpec>,
    /// Tokens that matched the grammar but carried no name.
    pub invalid_tokens: Vec<String>,
}

/// Collect parameters from a graph. `defaults` (from metadata) makes a name optional.
pub fn scan(graph: &Value, defaults: &Map<String, Value>) -> ScanResult {
    let mut result = ScanResult::default();

    for (node_id, input, raw) in placeholders(graph) {
        let (explicit, name) = match parse_token(&raw) {
            Some(ParsedToken::Param { explicit, name }) => (explicit, name),
            Some(ParsedToken::EmptyName) => {
                result.invalid_tokens.push(format!("{} at node {}.{}", raw, node_id, input));
                continue;
            }
            None => continue,
        };
        let binding = Binding { node_id, input };

        match result.parameters.iter_mut().find(|p| p.name == name) {
            Some(existing) => {
                if let Some(ty) = explicit {
                    if !existing.explicit_type {
                        existing.param_type = ty;
                        existing.explicit_type = true;
                    }
                }
                existing.bindings.push(binding);
            }
            None => {
                let default = defaults.get(&name).cloned();
                result.parameters.push(ParameterSpec {
                    param_type: explicit.unwrap_or_else(|| ParamType::infer(&name)),
                    explicit_type: explicit.is_some(),
                    required: default.is_none() && !OPTIONAL_NAMES.contains(&name.as_str()),
                    default,
                    bindings: vec![binding],
                    name,
                });
            }
        }
    }
    result
}

// i64::MIN is exactly representable; i64::MAX rounds up to 2^63.
const I64_LOW: f64 = -9_223_372_036_854_775_808.0;
const I64_HIGH: f64 = 9_223_372_036_854_775_808.0;

/// Coerce a caller-supplied value to a parameter type.
pub fn coerce(value: &Value, ty: ParamType) -> Result<Value, String> {
    match ty {
        ParamType::Int => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && (I64_LOW..I64_HIGH).contains(&f) => Ok(Value::from(f as i64)),
                _ => Err(format!("expected an integer, got {}", n)),
            },
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("expected an integer, got \"{}\"", s)),
            other => Err(format!("expected an integer, got {}", other)),
        },
        ParamType::Float => match value {
            Value::Number(n) => n
                .as_f64()
                .map(Value::from)
                .ok_or_else(|| format!("expected a number, got {}", n)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::from)
                .ok_or_else(|| format!("expected a number, got \"{}\"", s)),
            other => Err(format!("expected a number, got {}", other)),
        },
        ParamType::Bool => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::Number(n) if n.as_i64() == Some(0) => Ok(Value::Bool(false)),
            Value::Number(n) if n.as_i64() == Some(1) => Ok(Value::Bool(true)),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "no" => Ok(Value::Bool(false)),
                _ => Err(format!("expected a boolean, got \"{}\"", s)),
            },
            other => Err(format!("expected a boolean, got {}", other)),
        },
        ParamType::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(format!("expected a string, got {}", other)),
        },
    }
}

/// Write resolved values into a copy of `graph` at every binding.
pub fn substitute(graph: &Value, parameters: &[ParameterSpec], values: &Map<String, Value>) -> Value {
    let mut rendered = graph.clone();
    for param in parameters {
        let Some(value) = values.get(&param.name) else {
            continue;
        };
        for b in &param.bindings {
            if let Some(slot) = rendered
                .get_mut(b.node_id.as_str())
                .and_then(|n| n.get_mut("inputs"))
                .and_then(|i| i.get_mut(b.input.as_str()))
            {
                *slot = value.clone();
            }
        }
    }
    rendered
}

/// Placeholder tokens still present in a graph, as `node.input=TOKEN`.
pub fn remaining_placeholders(graph: &Value) -> Vec<String> {
    placeholders(graph)
        .into_iter()
        .map(|(node, input, raw)| format!("{}.{}={}", node, input, raw))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_prefixes() {
        assert_eq!(
            parse_token("PARAM_INT_STEPS"),
            Some(ParsedToken::Param { explicit: Some(ParamType::Int), name: "steps".into() })
        );
        assert_eq!(
            parse_token("PARAM_STR_NEGATIVE_PROMPT"),
            Some(ParsedToken::Param { explicit: Some(ParamType::String), name: "negative_prompt".into() })
        );
        assert_eq!(
            parse_token("PARAM_PROMPT"),
            Some(ParsedToken::Param { explicit: None, name: "prompt".into() })
        );
        assert_eq!(parse_token("PARAM_INT_"), Some(ParsedToken::EmptyName));
        assert_eq!(parse_token("PARAM_BOOL"), Some(ParsedToken::EmptyName));
        assert_eq!(parse_token("PARAM_"), Some(ParsedToken::EmptyName));
        assert_eq!(parse_token("PARAM"), None);
        assert_eq!(parse_token("a PARAM_PROMPT"), None);
        assert_eq!(parse_token("param_prompt"), None);
    }

    #[test]
    fn test_infer() {
        assert_eq!(ParamType::infer("seed"), ParamType::Int);
        assert_eq!(ParamType::infer("lora_strength"), ParamType::Float);
        assert_eq!(ParamType::infer("cfg"), ParamType::Float);
        assert_eq!(ParamType::infer("tags"), ParamType::String);
    }

    #[test]
    fn test_node_id_order() {
        let mut ids = vec!["10", "3", "b", "a", "25"];
        ids.sort_by(|a, b| compare_node_ids(a, b));
        assert_eq!(ids, vec!["3", "10", "25", "a", "b"]);
    }

    #[test]
    fn test_coerce() {
        assert_eq!(coerce(&json!("42"), ParamType::Int).unwrap(), json!(42));
        assert_eq!(coerce(&json!(3.0), ParamType::Int).unwrap(), json!(3));
        assert!(coerce(&json!(3.5), ParamType::Int).is_err());
        assert!(coerce(&json!(1e20), ParamType::Int).is_err());
        assert!(coerce(&json!(-1e19), ParamType::Int).is_err());
        assert_eq!(coerce(&json!(-4096.0), ParamType::Int).unwrap(), json!(-4096));
        assert_eq!(coerce(&json!(7), ParamType::Float).unwrap(), json!(7.0));
        assert_eq!(coerce(&json!("false"), ParamType::Bool).unwrap(), json!(false));
        assert_eq!(coerce(&json!(1), ParamType::Bool).unwrap(), json!(true));
        assert_eq!(coerce(&json!(12), ParamType::String).unwrap(), json!("12"));
        assert!(coerce(&json!({"a": 1}), ParamType::String).is_err());
    }
}
