//! Envelope - the encrypted record persisted on disk
//!
//! ```text
//! { "data": <base64 ciphertext>, "iv": <base64>, "salt": <base64, optional> }
//! ```

use crate::cipher;
use crate::error::VaultError;
use crate::format::{EnvelopeVersion, SALT_LENGTH};
use crate::kdf::KdfParams;
use crate::prompt::Passphrase;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

/// Encrypted record as stored on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    /// `None` for legacy envelopes
    pub salt: Option<Vec<u8>>,
}

/// Wire form with base64 text fields
#[derive(Debug, Serialize, Deserialize)]
struct EnvelopeRecord {
    data: String,
    iv: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    salt: Option<String>,
}

impl Envelope {
    /// Encrypt a plaintext with a freshly salted key
    pub fn seal(
        plaintext: &[u8],
        passphrase: &Passphrase,
        kdf: &KdfParams,
    ) -> Result<Self, VaultError> {
        let salt = cipher::generate_salt();
        let key = kdf.derive_key(passphrase, &salt)?;
        let (ciphertext, iv) = cipher::encrypt(plaintext, &key)?;

        Ok(Self {
            ciphertext,
            iv: iv.to_vec(),
            salt: Some(salt.to_vec()),
        })
    }

    /// Derive the key from the stored salt (or the legacy constant) and
    /// decrypt
    pub fn open(&self, passphrase: &Passphrase, kdf: &KdfParams) -> Result<Vec<u8>, VaultError> {
        let key = match &self.salt {
            Some(salt) => kdf.derive_key(passphrase, salt)?,
            None => kdf.derive_legacy_key(passphrase)?,
        };
        cipher::decrypt(&self.ciphertext, &self.iv, &key)
    }

    pub fn version(&self) -> EnvelopeVersion {
        if self.salt.is_some() {
            EnvelopeVersion::Salted
        } else {
            EnvelopeVersion::Legacy
        }
    }

    /// Encode to the on-disk JSON record
    pub fn encode(&self) -> Result<Vec<u8>, VaultError> {
        let record = EnvelopeRecord {
            data: BASE64.encode(&self.ciphertext),
            iv: BASE64.encode(&self.iv),
            salt: self.salt.as_ref().map(|salt| BASE64.encode(salt)),
        };
        serde_json::to_vec(&record).map_err(|e| VaultError::CorruptEnvelope(e.to_string()))
    }

    /// Decode the on-disk JSON record
    pub fn decode(bytes: &[u8]) -> Result<Self, VaultError> {
        let record: EnvelopeRecord = serde_json::from_slice(bytes)
            .map_err(|e| VaultError::CorruptEnvelope(format!("invalid record: {}", e)))?;

        let salt = record
            .salt
            .as_deref()
            .map(|salt| decode_field("salt", salt))
            .transpose()?;
        if let Some(salt) = &salt {
            if salt.len() != SALT_LENGTH {
                return Err(VaultError::CorruptEnvelope(format!(
                    "salt is {} bytes, expected {}",
                    salt.len(),
                    SALT_LENGTH
                )));
            }
        }

        Ok(Self {
            ciphertext: decode_field("data", &record.data)?,
            iv: decode_field("iv", &record.iv)?,
            salt,
        })
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, VaultError> {
    BASE64
        .decode(value.trim())
        .map_err(|e| VaultError::CorruptEnvelope(format!("field '{}' is not base64: {}", name, e)))
}
