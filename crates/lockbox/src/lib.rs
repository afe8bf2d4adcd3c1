//! lockbox - a local secrets vault
//!
//! One file holds an arbitrarily nested tree of secrets, encrypted under a
//! passphrase only the user knows. The passphrase is stretched with
//! PBKDF2-HMAC-SHA256 and the tree sealed with AES-256-GCM; every write
//! uses a fresh salt and IV and replaces the whole file.
//!
//! Access goes through a [`Session`]: unlock once, read and update as
//! often as needed, and the passphrase is asked for at most once.

pub mod accessor;
pub mod cipher;
pub mod codec;
pub mod config;
pub mod editor;
pub mod envelope;
pub mod error;
pub mod format;
pub mod inject;
pub mod kdf;
pub mod path;
pub mod paths;
pub mod prompt;
pub mod session;
pub mod store;
pub mod tree;

pub use accessor::Mutation;
pub use config::VaultConfig;
pub use envelope::Envelope;
pub use error::VaultError;
pub use kdf::KdfParams;
pub use path::KeyPath;
pub use paths::Paths;
pub use prompt::{Passphrase, PasswordPrompt, TerminalPrompt};
pub use session::{PassphraseGuard, Session, UnlockGuard};
pub use store::{Contents, SecretsFile};
pub use tree::SecretsTree;
