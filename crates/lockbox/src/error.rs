//! Vault error taxonomy

use thiserror::Error;

/// Vault-specific errors
///
/// Library functions return `anyhow::Result` and raise these with `bail!`;
/// callers that need to branch on the kind use [`VaultError::kind`].
#[derive(Error, Debug)]
pub enum VaultError {
    /// Integrity check failed. Wrong passphrase and tampered file are
    /// reported identically.
    #[error("passphrase incorrect")]
    Authentication,

    #[error("secrets tree accessed outside of an unlock scope")]
    NotUnlocked,

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("secrets file is corrupt: {0}")]
    CorruptEnvelope(String),

    #[error("editor failed: {0}")]
    Editor(String),

    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Find the vault error carried by an `anyhow` chain, if any
    pub fn kind(err: &anyhow::Error) -> Option<&VaultError> {
        err.chain().find_map(|cause| cause.downcast_ref::<VaultError>())
    }

    /// True when the error chain bottoms out in a failed integrity check
    pub fn is_authentication(err: &anyhow::Error) -> bool {
        matches!(Self::kind(err), Some(VaultError::Authentication))
    }
}
