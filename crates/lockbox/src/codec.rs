//! Text codec for the secrets tree (YAML, a JSON superset that allows
//! non-string keys)

use crate::error::VaultError;
use crate::tree::SecretsTree;
use serde_yaml::Value;

/// Serialize a tree to its plaintext byte form
pub fn serialize(tree: &SecretsTree) -> Result<Vec<u8>, VaultError> {
    serde_yaml::to_string(tree)
        .map(String::into_bytes)
        .map_err(|e| VaultError::MalformedInput(format!("cannot serialize tree: {}", e)))
}

/// Parse plaintext back into a tree. Blank input is the empty tree.
pub fn deserialize(bytes: &[u8]) -> Result<SecretsTree, VaultError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| VaultError::MalformedInput("secrets are not valid UTF-8".to_string()))?;
    if text.trim().is_empty() {
        return Ok(SecretsTree::new());
    }

    match parse_value(text)? {
        Value::Null => Ok(SecretsTree::new()),
        Value::Mapping(mapping) => Ok(SecretsTree::from(mapping)),
        other => Err(VaultError::MalformedInput(format!(
            "top level must be a map, found {}",
            kind_name(&other)
        ))),
    }
}

/// Parse one structured value (scalar, list, or map) from user input
pub fn parse_value(text: &str) -> Result<Value, VaultError> {
    serde_yaml::from_str(text).map_err(|e| VaultError::MalformedInput(e.to_string()))
}

/// Render a value for display: scalars bare, containers as YAML
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a map",
        Value::Tagged(_) => "a tagged value",
    }
}
