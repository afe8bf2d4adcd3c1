//! Path accessor: nested get/set/delete/merge on the secrets tree

use crate::error::VaultError;
use crate::path::KeyPath;
use crate::tree::SecretsTree;
use anyhow::{bail, Result};
use serde_yaml::{Mapping, Value};

/// Nested lookup. A missing segment anywhere yields `None`.
pub fn get<'t>(tree: &'t SecretsTree, path: &KeyPath) -> Option<&'t Value> {
    let (last, parents) = path.segments().split_last()?;
    let mut node = tree.as_mapping();
    for segment in parents {
        node = node.get(segment)?.as_mapping()?;
    }
    node.get(last)
}

/// Store `value` at `path`, creating intermediate maps. Returns the value it
/// replaced.
///
/// A later `get(path)` returns `value`, except when a proper prefix of
/// `path` already holds a leaf: `set` will not turn that leaf into a map.
/// It fails with [`VaultError::MalformedInput`] and leaves the tree
/// unchanged.
pub fn set(tree: &mut SecretsTree, path: &KeyPath, value: Value) -> Result<Option<Value>> {
    let Some((last, parents)) = path.segments().split_last() else {
        bail!(VaultError::MalformedInput("path cannot be empty".to_string()));
    };
    let node = descend_creating(tree.as_mapping_mut(), parents, path)?;
    Ok(node.insert(last.clone(), value))
}

/// Remove the value at `path` and prune every ancestor map this leaves
/// empty. The root itself is never removed, only emptied.
pub fn delete(tree: &mut SecretsTree, path: &KeyPath) -> Option<Value> {
    remove_pruning(tree.as_mapping_mut(), path.segments())
}

/// Deep-merge `incoming` into the map at `path` (the root when `None`).
/// Maps merge key by key; anything else overwrites.
pub fn merge(tree: &mut SecretsTree, path: Option<&KeyPath>, incoming: Mapping) -> Result<()> {
    let target = match path {
        Some(path) => descend_creating(tree.as_mapping_mut(), path.segments(), path)?,
        None => tree.as_mapping_mut(),
    };
    merge_into(target, incoming);
    Ok(())
}

/// Copy of the tree with every leaf replaced by `mask`
pub fn mask(tree: &SecretsTree, mask: &str) -> SecretsTree {
    SecretsTree::from(mask_mapping(tree.as_mapping(), mask))
}

/// Mask a single value (leaf or sub-tree)
pub fn mask_value(value: &Value, mask: &str) -> Value {
    match value {
        Value::Mapping(child) => Value::Mapping(mask_mapping(child, mask)),
        _ => Value::String(mask.to_string()),
    }
}

fn mask_mapping(node: &Mapping, mask: &str) -> Mapping {
    node.iter()
        .map(|(key, value)| (key.clone(), mask_value(value, mask)))
        .collect()
}

fn descend_creating<'t>(
    mut node: &'t mut Mapping,
    segments: &[Value],
    path: &KeyPath,
) -> Result<&'t mut Mapping> {
    for (depth, segment) in segments.iter().enumerate() {
        let child = node
            .entry(segment.clone())
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        node = match child {
            Value::Mapping(map) => map,
            _ => bail!(VaultError::MalformedInput(format!(
                "{} holds a value, not a map",
                path.prefix(depth + 1)
            ))),
        };
    }
    Ok(node)
}

fn remove_pruning(node: &mut Mapping, segments: &[Value]) -> Option<Value> {
    let (first, rest) = segments.split_first()?;
    if rest.is_empty() {
        return node.shift_remove(first);
    }

    let child = node.get_mut(first)?.as_mapping_mut()?;
    let removed = remove_pruning(child, rest)?;
    if child.is_empty() {
        node.shift_remove(first);
    }
    Some(removed)
}

fn merge_into(target: &mut Mapping, incoming: Mapping) {
    for (key, value) in incoming {
        if let Value::Mapping(child) = value {
            if let Some(Value::Mapping(existing)) = target.get_mut(&key) {
                merge_into(existing, child);
                continue;
            }
            target.insert(key, Value::Mapping(child));
        } else {
            target.insert(key, value);
        }
    }
}

/// One step of a bulk edit
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Set { path: KeyPath, value: Value },
    Delete { path: KeyPath },
    Merge { path: Option<KeyPath>, value: Mapping },
}

impl Mutation {
    pub fn apply(&self, tree: &mut SecretsTree) -> Result<()> {
        match self {
            Mutation::Set { path, value } => {
                set(tree, path, value.clone())?;
            }
            Mutation::Delete { path } => {
                if delete(tree, path).is_none() {
                    tracing::debug!(%path, "Nothing to delete");
                }
            }
            Mutation::Merge { path, value } => merge(tree, path.as_ref(), value.clone())?,
        }
        Ok(())
    }
}

/// Apply a batch all-or-nothing: on error `tree` is left as it was
pub fn apply_all(tree: &mut SecretsTree, mutations: &[Mutation]) -> Result<()> {
    let mut staged = tree.clone();
    for mutation in mutations {
        mutation.apply(&mut staged)?;
    }
    *tree = staged;
    Ok(())
}
