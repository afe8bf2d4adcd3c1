//! Passphrase key derivation (PBKDF2-HMAC-SHA256)

use crate::error::VaultError;
use crate::format::{DEFAULT_KDF_ITERATIONS, KEY_LENGTH, LEGACY_SALT};
use crate::prompt::Passphrase;
use sha2::Sha256;
use std::time::Instant;
use zeroize::Zeroizing;

/// Tunable KDF parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

impl KdfParams {
    pub fn with_iterations(iterations: u32) -> Self {
        Self { iterations }
    }

    /// Stretch a passphrase into `output_length` key bytes.
    ///
    /// Deterministic for fixed inputs; the output length does not depend on
    /// anything but the argument.
    pub fn derive(
        &self,
        passphrase: &Passphrase,
        salt: &[u8],
        output_length: usize,
    ) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        if self.iterations == 0 {
            return Err(VaultError::MalformedInput(
                "KDF iteration count must be positive".to_string(),
            ));
        }
        if output_length == 0 {
            return Err(VaultError::MalformedInput(
                "KDF output length must be positive".to_string(),
            ));
        }

        let started = Instant::now();
        let mut key = Zeroizing::new(vec![0u8; output_length]);
        pbkdf2::pbkdf2_hmac::<Sha256>(
            passphrase.as_bytes(),
            salt,
            self.iterations,
            key.as_mut_slice(),
        );

        tracing::debug!(
            iterations = self.iterations,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Derived key"
        );
        Ok(key)
    }

    /// Derive a cipher key for the given salt
    pub fn derive_key(
        &self,
        passphrase: &Passphrase,
        salt: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        self.derive(passphrase, salt, KEY_LENGTH)
    }

    /// Derive with the fixed salt of salt-less envelopes; reads only
    pub fn derive_legacy_key(
        &self,
        passphrase: &Passphrase,
    ) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        self.derive(passphrase, &LEGACY_SALT, KEY_LENGTH)
    }
}
