//! External editor integration
//!
//! The tree is rendered as YAML into a private scratch file, the user's
//! editor runs on it, and the result is parsed back. Any failure aborts the
//! edit before the secrets file is touched.

use crate::codec;
use crate::error::VaultError;
use crate::session::Session;
use crate::tree::SecretsTree;
use anyhow::{bail, Context, Result};
use std::io::Write;
use std::process::Command;

const HEADER: &str = "# lockbox: edit secrets as YAML. Save and exit to apply.\n";

/// Editor command: configured value, then $VISUAL, then $EDITOR, then vi
pub fn resolve_editor(configured: Option<&str>) -> String {
    configured
        .map(str::to_string)
        .or_else(|| std::env::var("VISUAL").ok())
        .or_else(|| std::env::var("EDITOR").ok())
        .filter(|cmd| !cmd.trim().is_empty())
        .unwrap_or_else(|| "vi".to_string())
}

/// Run `editor` on `text` and return what the user saved
pub fn edit_text(editor: &str, text: &str) -> Result<String> {
    let mut parts = editor.split_whitespace();
    let Some(program) = parts.next() else {
        bail!(VaultError::Editor("no editor configured".to_string()));
    };

    let mut scratch = tempfile::Builder::new()
        .prefix("lockbox-edit-")
        .suffix(".yaml")
        .tempfile()
        .context("Failed to create scratch file")?;
    scratch.write_all(text.as_bytes())?;
    scratch.flush()?;

    let status = Command::new(program)
        .args(parts)
        .arg(scratch.path())
        .status()
        .map_err(|e| VaultError::Editor(format!("cannot launch '{}': {}", program, e)))?;
    if !status.success() {
        bail!(VaultError::Editor(format!("'{}' exited with {}", editor, status)));
    }

    let edited = std::fs::read_to_string(scratch.path())
        .map_err(|e| VaultError::Editor(format!("cannot read back edits: {}", e)))?;
    Ok(edited)
}

/// Text handed to the editor for a tree
pub fn render(tree: &SecretsTree) -> Result<String> {
    let body = if tree.is_empty() {
        String::new()
    } else {
        String::from_utf8(codec::serialize(tree)?).context("Serialized tree is not UTF-8")?
    };
    Ok(format!("{}{}", HEADER, body))
}

/// Edit the whole tree interactively. Returns whether anything changed;
/// an unchanged tree is not rewritten.
pub fn edit_session(session: &Session, editor: &str) -> Result<bool> {
    let _unlocked = session.unlock()?;
    let current = session.tree()?;

    let edited = edit_text(editor, &render(&current)?)?;
    let parsed = codec::deserialize(edited.as_bytes())
        .map_err(|e| VaultError::Editor(format!("edited secrets do not parse: {}", e)))?;

    if parsed == *current {
        tracing::debug!("Editor made no changes");
        return Ok(false);
    }

    session.update(move |tree| {
        *tree = parsed;
        Ok(())
    })?;
    Ok(true)
}
