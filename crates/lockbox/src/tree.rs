//! SecretsTree - the decrypted, arbitrarily nested key-value structure

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

/// Nested mapping from scalar keys to sub-trees or leaf values.
///
/// Keys may be any YAML scalar (strings, integers, booleans), so the tree
/// is backed by a [`serde_yaml::Mapping`] rather than a string-keyed map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretsTree(Mapping);

impl SecretsTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_mapping(&self) -> &Mapping {
        &self.0
    }

    pub fn as_mapping_mut(&mut self) -> &mut Mapping {
        &mut self.0
    }

    pub fn into_mapping(self) -> Mapping {
        self.0
    }

    /// Every leaf with the chain of keys leading to it, depth first
    pub fn leaves(&self) -> Vec<(Vec<&Value>, &Value)> {
        let mut out = Vec::new();
        collect_leaves(&self.0, &mut Vec::new(), &mut out);
        out
    }
}

impl From<Mapping> for SecretsTree {
    fn from(mapping: Mapping) -> Self {
        Self(mapping)
    }
}

fn collect_leaves<'t>(
    node: &'t Mapping,
    prefix: &mut Vec<&'t Value>,
    out: &mut Vec<(Vec<&'t Value>, &'t Value)>,
) {
    for (key, value) in node {
        prefix.push(key);
        match value {
            Value::Mapping(child) => collect_leaves(child, prefix, out),
            leaf => out.push((prefix.clone(), leaf)),
        }
        prefix.pop();
    }
}

/// True for values that may serve as map keys and path segments
pub fn is_scalar(value: &Value) -> bool {
    !matches!(
        value,
        Value::Mapping(_) | Value::Sequence(_) | Value::Tagged(_)
    )
}
