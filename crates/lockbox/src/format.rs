//! On-disk format constants

/// Default name of the secrets file, looked up in the working directory and
/// then in the home directory
pub const DEFAULT_FILE_NAME: &str = ".lockbox";

/// Derived key length in bytes (256 bits for AES-256)
pub const KEY_LENGTH: usize = 32;

/// IV length in bytes
pub const IV_LENGTH: usize = 16;

/// Salt length in bytes
pub const SALT_LENGTH: usize = 16;

/// PBKDF2-HMAC-SHA256 rounds; roughly 100ms on commodity hardware
pub const DEFAULT_KDF_ITERATIONS: u32 = 600_000;

/// Salt used for envelopes written before per-file salts existed.
///
/// Read-only: new envelopes always carry a random salt.
pub const LEGACY_SALT: [u8; SALT_LENGTH] = *b"lockbox/legacy\0\0";

/// Permissions for the secrets file and editor scratch files
pub const FILE_MODE: u32 = 0o600;

/// Text shown in place of every leaf value when masking
pub const DEFAULT_MASK: &str = "********";

/// Envelope layout revision, inferred from the fields present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeVersion {
    /// No `salt` field; key derived with [`LEGACY_SALT`]
    Legacy,
    /// Random per-write salt stored alongside the ciphertext
    Salted,
}

impl EnvelopeVersion {
    /// The layout produced by every write
    pub const CURRENT: EnvelopeVersion = EnvelopeVersion::Salted;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Salted => "salted",
        }
    }
}

impl std::fmt::Display for EnvelopeVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
