//! Key paths into the secrets tree
//!
//! Two spellings are accepted:
//! - slash form, `api/openai`, every segment a string
//! - flow form, `[db, 5432]`, segments typed as YAML scalars

use crate::codec;
use crate::error::VaultError;
use crate::tree::is_scalar;
use serde_yaml::Value;
use std::fmt;
use std::str::FromStr;

/// Non-empty sequence of scalar keys
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPath(Vec<Value>);

impl KeyPath {
    /// Build a path from already-typed segments
    pub fn new(segments: Vec<Value>) -> Result<Self, VaultError> {
        if segments.is_empty() {
            return Err(VaultError::MalformedInput("path cannot be empty".to_string()));
        }
        if let Some(bad) = segments.iter().find(|s| !is_scalar(s)) {
            return Err(VaultError::MalformedInput(format!(
                "path segment {} is not a scalar",
                codec::render_value(bad)
            )));
        }
        Ok(Self(segments))
    }

    /// Parse either spelling
    pub fn parse(text: &str) -> Result<Self, VaultError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(VaultError::MalformedInput("path cannot be empty".to_string()));
        }

        if text.starts_with('[') {
            return match codec::parse_value(text)? {
                Value::Sequence(segments) => Self::new(segments),
                _ => Err(VaultError::MalformedInput(format!("invalid path: {}", text))),
            };
        }

        let segments = text
            .split('/')
            .map(|segment| {
                if segment.is_empty() {
                    Err(VaultError::MalformedInput(format!(
                        "empty segment in path: {}",
                        text
                    )))
                } else {
                    Ok(Value::String(segment.to_string()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(segments)
    }

    pub fn segments(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept alongside `len` for clippy
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The first `depth` segments, for error messages
    pub fn prefix(&self, depth: usize) -> KeyPath {
        KeyPath(self.0[..depth.clamp(1, self.0.len())].to_vec())
    }

    fn is_slash_safe(&self) -> bool {
        self.0.iter().all(|segment| match segment {
            Value::String(s) => !s.is_empty() && !s.contains('/') && !s.starts_with('['),
            _ => false,
        })
    }
}

impl FromStr for KeyPath {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_slash_safe() {
            let joined: Vec<String> = self.0.iter().map(codec::render_value).collect();
            return f.write_str(&joined.join("/"));
        }

        let rendered: Vec<String> = self
            .0
            .iter()
            .map(|segment| match segment {
                Value::String(s) => {
                    serde_json::to_string(s).unwrap_or_else(|_| s.clone())
                }
                Value::Null => "null".to_string(),
                other => codec::render_value(other),
            })
            .collect();
        write!(f, "[{}]", rendered.join(", "))
    }
}
