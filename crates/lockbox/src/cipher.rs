//! Envelope cipher: AES-256-GCM with a 16-byte IV
//!
//! The GCM tag is the only thing that tells a wrong passphrase apart from a
//! good one, so every decrypt failure collapses into
//! [`VaultError::Authentication`]. Corruption and a bad passphrase are
//! deliberately indistinguishable.

use crate::error::VaultError;
use crate::format::{IV_LENGTH, SALT_LENGTH};
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use rand::RngCore;

/// AES-256-GCM parameterised for 128-bit IVs
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Encrypt `plaintext` under `key` with a fresh random IV.
///
/// Returns `(ciphertext || tag, iv)`.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<(Vec<u8>, [u8; IV_LENGTH]), VaultError> {
    let cipher = Aes256Gcm16::new_from_slice(key)
        .map_err(|_| VaultError::MalformedInput(format!("invalid key length {}", key.len())))?;

    let iv = random_bytes::<IV_LENGTH>();
    let ciphertext = cipher
        .encrypt(Nonce::<U16>::from_slice(&iv), plaintext)
        .map_err(|_| VaultError::MalformedInput("plaintext too large to encrypt".to_string()))?;

    Ok((ciphertext, iv))
}

/// Decrypt and verify. Any failure is an authentication failure.
pub fn decrypt(ciphertext: &[u8], iv: &[u8], key: &[u8]) -> Result<Vec<u8>, VaultError> {
    if iv.len() != IV_LENGTH {
        return Err(VaultError::Authentication);
    }
    let cipher = Aes256Gcm16::new_from_slice(key).map_err(|_| VaultError::Authentication)?;

    cipher
        .decrypt(Nonce::<U16>::from_slice(iv), ciphertext)
        .map_err(|_| VaultError::Authentication)
}

/// Fresh salt for a new envelope
pub fn generate_salt() -> [u8; SALT_LENGTH] {
    random_bytes::<SALT_LENGTH>()
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
