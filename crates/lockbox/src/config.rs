//! Lockbox configuration
//!
//! Read from ~/.config/lockbox/config.yaml. Every field is optional; a
//! missing file means defaults.

use crate::format::{DEFAULT_FILE_NAME, DEFAULT_KDF_ITERATIONS, DEFAULT_MASK};
use crate::kdf::KdfParams;
use crate::paths::Paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Secrets file name looked up in the working and home directories
    pub file_name: String,

    /// PBKDF2 rounds. Files must be read with the count they were written
    /// with, so change this only alongside `lockbox passwd`.
    pub kdf_iterations: u32,

    /// Editor command for `lockbox edit`; falls back to $VISUAL, $EDITOR
    pub editor: Option<String>,

    /// Replacement text for `lockbox inspect`
    pub mask: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            file_name: DEFAULT_FILE_NAME.to_string(),
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            editor: None,
            mask: DEFAULT_MASK.to_string(),
        }
    }
}

impl VaultConfig {
    /// Load configuration from the default location
    pub fn load(paths: &Paths) -> Result<Self> {
        Self::load_from(&paths.config_file())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {:?}", path))?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn kdf(&self) -> KdfParams {
        KdfParams::with_iterations(self.kdf_iterations)
    }
}
