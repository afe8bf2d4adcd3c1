//! Standard paths and secrets-file resolution

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Directories consulted when locating files
#[derive(Debug, Clone)]
pub struct Paths {
    /// Working directory of the invocation
    pub cwd: PathBuf,
    /// Home directory, if one can be determined
    pub home: Option<PathBuf>,
    /// Config directory (~/.config/lockbox)
    pub config: PathBuf,
}

impl Paths {
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to determine working directory")?;
        let home = dirs::home_dir();
        let config = dirs::config_dir()
            .or_else(|| home.as_ref().map(|h| h.join(".config")))
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("lockbox");

        Ok(Self { cwd, home, config })
    }

    /// Path of the config file
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.yaml")
    }

    /// Pick the secrets file: explicit override, then `file_name` in the
    /// working directory if it exists, then `file_name` in the home
    /// directory.
    pub fn resolve_secrets_file(&self, explicit: Option<&Path>, file_name: &str) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }

        let local = self.cwd.join(file_name);
        if local.exists() {
            return local;
        }

        match &self.home {
            Some(home) => home.join(file_name),
            None => local,
        }
    }
}
