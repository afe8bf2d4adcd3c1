//! Environment injection - turn tree values into variables for a child
//! process

use crate::accessor;
use crate::codec;
use crate::error::VaultError;
use crate::path::KeyPath;
use crate::tree::SecretsTree;
use anyhow::{bail, Result};
use serde_yaml::Value;
use std::process::Command;
use std::str::FromStr;

/// `NAME=path` - bind one variable to one leaf
#[derive(Debug, Clone, PartialEq)]
pub struct EnvBinding {
    pub name: String,
    pub path: KeyPath,
}

impl FromStr for EnvBinding {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((name, path)) = s.split_once('=') else {
            return Err(VaultError::MalformedInput(format!(
                "expected NAME=PATH, got '{}'",
                s
            )));
        };
        if !is_valid_name(name) {
            return Err(VaultError::MalformedInput(format!(
                "invalid environment variable name '{}'",
                name
            )));
        }
        Ok(Self {
            name: name.to_string(),
            path: KeyPath::parse(path)?,
        })
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Convert a chain of keys to a variable name, e.g. `api/openai` ->
/// `API_OPENAI`
pub fn env_var_name(keys: &[&Value]) -> String {
    let joined = keys
        .iter()
        .map(|key| codec::render_value(key))
        .collect::<Vec<_>>()
        .join("_");
    let mut name: String = joined
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

/// Resolve explicit bindings to literal values. Every path must exist and
/// name a leaf.
pub fn resolve_bindings(
    tree: &SecretsTree,
    bindings: &[EnvBinding],
) -> Result<Vec<(String, String)>> {
    bindings
        .iter()
        .map(|binding| {
            let value = leaf_at(tree, &binding.path)?;
            Ok((binding.name.clone(), value))
        })
        .collect()
}

/// Every leaf under `prefix` (the whole tree when `None`), named from its
/// keys relative to the prefix
pub fn flatten(tree: &SecretsTree, prefix: Option<&KeyPath>) -> Result<Vec<(String, String)>> {
    let subtree = match prefix {
        None => tree.clone(),
        Some(path) => match accessor::get(tree, path) {
            Some(Value::Mapping(mapping)) => SecretsTree::from(mapping.clone()),
            Some(_) => bail!(VaultError::MalformedInput(format!(
                "{} is a value, not a map",
                path
            ))),
            None => bail!(VaultError::NotFound(path.to_string())),
        },
    };

    Ok(subtree
        .leaves()
        .into_iter()
        .map(|(keys, value)| (env_var_name(&keys), codec::render_value(value)))
        .collect())
}

/// Build a command with `vars` added to its environment
pub fn command_with_env(program: &str, args: &[String], vars: &[(String, String)]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    for (name, value) in vars {
        cmd.env(name, value);
    }
    cmd
}

fn leaf_at(tree: &SecretsTree, path: &KeyPath) -> Result<String> {
    match accessor::get(tree, path) {
        None => bail!(VaultError::NotFound(path.to_string())),
        Some(Value::Mapping(_)) => bail!(VaultError::MalformedInput(format!(
            "{} is a map, not a value",
            path
        ))),
        Some(value) => Ok(codec::render_value(value)),
    }
}
