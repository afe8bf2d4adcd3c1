//! Secrets store - binds one file on disk to one encrypted envelope
//!
//! The file is only ever replaced wholesale: a new envelope is sealed in
//! memory, written to a temporary file next to the target and renamed over
//! it. Nothing touches disk until the whole new tree and a passphrase are
//! available.

use crate::accessor;
use crate::codec;
use crate::config::VaultConfig;
use crate::envelope::Envelope;
use crate::error::VaultError;
use crate::format::{EnvelopeVersion, FILE_MODE};
use crate::kdf::KdfParams;
use crate::path::KeyPath;
use crate::paths::Paths;
use crate::prompt::{Passphrase, PasswordPrompt};
use crate::tree::SecretsTree;
use anyhow::{bail, Context, Result};
use serde_yaml::Value;
use std::fs::{self, Permissions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Label used when unlocking an existing file
pub const UNLOCK_PROMPT: &str = "Passphrase: ";

/// Label used when a new file needs its first passphrase
pub const NEW_PASSPHRASE_PROMPT: &str = "New passphrase: ";

/// Decrypted state of a secrets file
#[derive(Debug, Clone, Default)]
pub struct Contents {
    pub tree: SecretsTree,
    /// `None` when the file did not exist yet
    pub passphrase: Option<Passphrase>,
}

/// A secrets file on disk
#[derive(Debug, Clone)]
pub struct SecretsFile {
    path: PathBuf,
    kdf: KdfParams,
}

impl SecretsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kdf: KdfParams::default(),
        }
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Resolve the file per the lookup order and apply configured KDF cost
    pub fn resolve(paths: &Paths, explicit: Option<&Path>, config: &VaultConfig) -> Self {
        let path = paths.resolve_secrets_file(explicit, &config.file_name);
        tracing::debug!(path = %path.display(), "Resolved secrets file");
        Self::new(path).with_kdf(config.kdf())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kdf(&self) -> &KdfParams {
        &self.kdf
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Layout of the envelope on disk, without decrypting it
    pub fn envelope_version(&self) -> Result<Option<EnvelopeVersion>> {
        Ok(self.load_envelope()?.map(|envelope| envelope.version()))
    }

    /// Load and decrypt the file.
    ///
    /// A missing file is an empty tree with no passphrase. Otherwise the
    /// supplied passphrase is used, or the prompt is asked once. A failed
    /// integrity check propagates as [`VaultError::Authentication`]; retrying
    /// is the caller's call.
    pub fn read(
        &self,
        supplied: Option<&Passphrase>,
        prompt: &dyn PasswordPrompt,
    ) -> Result<Contents> {
        let Some(envelope) = self.load_envelope()? else {
            tracing::debug!(path = %self.path.display(), "No secrets file yet");
            return Ok(Contents::default());
        };

        let passphrase = match supplied {
            Some(passphrase) => passphrase.clone(),
            None => prompt.prompt_password(UNLOCK_PROMPT)?,
        };
        let tree = self.open(&envelope, &passphrase)?;

        Ok(Contents {
            tree,
            passphrase: Some(passphrase),
        })
    }

    /// Decrypt with a known passphrase. A missing file is an empty tree.
    pub fn decrypt(&self, passphrase: &Passphrase) -> Result<SecretsTree> {
        match self.load_envelope()? {
            Some(envelope) => self.open(&envelope, passphrase),
            None => Ok(SecretsTree::new()),
        }
    }

    /// Encrypt `tree` under a fresh salt and IV and atomically replace the
    /// file. Returns the number of bytes written.
    pub fn write(&self, tree: &SecretsTree, passphrase: &Passphrase) -> Result<usize> {
        if passphrase.is_empty() {
            bail!(VaultError::MalformedInput(
                "passphrase cannot be empty".to_string()
            ));
        }

        let plaintext = Zeroizing::new(codec::serialize(tree)?);
        let envelope = Envelope::seal(&plaintext, passphrase, &self.kdf)?;
        let bytes = envelope.encode()?;

        self.replace_file(&bytes)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        tracing::info!(
            path = %self.path.display(),
            bytes = bytes.len(),
            "Wrote secrets file"
        );
        Ok(bytes.len())
    }

    /// Read, mutate, write. The only safe way to change the file.
    ///
    /// A new file gets its passphrase from `supplied` or a prompt, asked
    /// only after the mutation succeeded. If anything fails before the
    /// final write the file is untouched.
    pub fn update<T>(
        &self,
        supplied: Option<&Passphrase>,
        prompt: &dyn PasswordPrompt,
        mutate: impl FnOnce(&mut SecretsTree) -> Result<T>,
    ) -> Result<T> {
        let Contents {
            mut tree,
            passphrase,
        } = self.read(supplied, prompt)?;

        let output = mutate(&mut tree)?;

        let passphrase = match passphrase {
            Some(passphrase) => passphrase,
            None => new_passphrase(supplied, prompt)?,
        };
        self.write(&tree, &passphrase)?;
        Ok(output)
    }

    /// Delete the value at `path`, pruning emptied branches
    pub fn delete(
        &self,
        supplied: Option<&Passphrase>,
        prompt: &dyn PasswordPrompt,
        path: &KeyPath,
    ) -> Result<Option<Value>> {
        self.update(supplied, prompt, |tree| Ok(accessor::delete(tree, path)))
    }

    /// Re-encrypt the whole tree under a new passphrase
    pub fn rekey(
        &self,
        supplied: Option<&Passphrase>,
        prompt: &dyn PasswordPrompt,
        new: &Passphrase,
    ) -> Result<usize> {
        let contents = self.read(supplied, prompt)?;
        self.write(&contents.tree, new)
    }

    fn load_envelope(&self) -> Result<Option<Envelope>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(VaultError::Io(err))
                    .with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };
        let envelope = Envelope::decode(&bytes)
            .with_context(|| format!("Failed to decode {}", self.path.display()))?;
        Ok(Some(envelope))
    }

    fn open(&self, envelope: &Envelope, passphrase: &Passphrase) -> Result<SecretsTree> {
        let plaintext = Zeroizing::new(envelope.open(passphrase, &self.kdf)?);
        if envelope.version() == EnvelopeVersion::Legacy {
            tracing::info!(
                path = %self.path.display(),
                "Read legacy envelope; next write upgrades it"
            );
        }
        Ok(codec::deserialize(&plaintext)?)
    }

    fn replace_file(&self, bytes: &[u8]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(VaultError::Io)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".lockbox-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(VaultError::Io)?;
        tmp.write_all(bytes).map_err(VaultError::Io)?;
        tmp.as_file().sync_all().map_err(VaultError::Io)?;
        fs::set_permissions(tmp.path(), Permissions::from_mode(FILE_MODE))
            .map_err(VaultError::Io)?;
        tmp.persist(&self.path)
            .map_err(|err| VaultError::Io(err.error))?;
        Ok(())
    }
}

/// Passphrase for a file that has none yet
pub(crate) fn new_passphrase(
    supplied: Option<&Passphrase>,
    prompt: &dyn PasswordPrompt,
) -> Result<Passphrase> {
    let passphrase = match supplied {
        Some(passphrase) => passphrase.clone(),
        None => prompt.prompt_password(NEW_PASSPHRASE_PROMPT)?,
    };
    if passphrase.is_empty() {
        bail!(VaultError::MalformedInput(
            "passphrase cannot be empty".to_string()
        ));
    }
    Ok(passphrase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher;
    use crate::format::LEGACY_SALT;
    use std::cell::Cell;
    use tempfile::TempDir;

    fn fast_file(dir: &TempDir) -> SecretsFile {
        SecretsFile::new(dir.path().join("secrets.lockbox"))
            .with_kdf(KdfParams::with_iterations(1_000))
    }

    fn fixed(passphrase: &'static str) -> impl Fn(&str) -> Result<Passphrase> {
        move |_: &str| Ok(Passphrase::from(passphrase))
    }

    fn never(_: &str) -> Result<Passphrase> {
        panic!("prompt should not be called")
    }

    fn tree(yaml: &str) -> SecretsTree {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn path(text: &str) -> KeyPath {
        KeyPath::parse(text).unwrap()
    }

    #[test]
    fn test_missing_file_reads_empty_without_prompt() -> Result<()> {
        let tmp = TempDir::new()?;
        let file = fast_file(&tmp);

        let contents = file.read(None, &never)?;
        assert!(contents.tree.is_empty());
        assert!(contents.passphrase.is_none());
        assert!(!file.exists());
        Ok(())
    }

    #[test]
    fn test_write_read_round_trip() -> Result<()> {
        let tmp = TempDir::new()?;
        let file = fast_file(&tmp);
        let original = tree("api:\n  openai: sk-1\n5432: port\n");

        let written = file.write(&original, &Passphrase::from("pw"))?;
        assert_eq!(written as u64, fs::metadata(file.path())?.len());

        let contents = file.read(None, &fixed("pw"))?;
        assert_eq!(contents.tree, original);
        assert_eq!(contents.passphrase, Some(Passphrase::from("pw")));
        Ok(())
    }

    #[test]
    fn test_wrong_passphrase_is_authentication_error() -> Result<()> {
        let tmp = TempDir::new()?;
        let file = fast_file(&tmp);
        file.write(&tree("a: 1\n"), &Passphrase::from("pw"))?;
        let before = fs::read(file.path())?;

        let err = file.read(Some(&Passphrase::from("wrong")), &never).unwrap_err();
        assert!(VaultError::is_authentication(&err));
        assert_eq!(fs::read(file.path())?, before);
        Ok(())
    }

    #[test]
    fn test_supplied_passphrase_suppresses_prompt() -> Result<()> {
        let tmp = TempDir::new()?;
        let file = fast_file(&tmp);
        file.write(&tree("a: 1\n"), &Passphrase::from("pw"))?;

        let contents = file.read(Some(&Passphrase::from("pw")), &never)?;
        assert_eq!(contents.tree, tree("a: 1\n"));
        Ok(())
    }

    #[test]
    fn test_each_write_uses_fresh_salt_and_iv() -> Result<()> {
        let tmp = TempDir::new()?;
        let file = fast_file(&tmp);
        let pass = Passphrase::from("pw");

        file.write(&tree("a: 1\n"), &pass)?;
        let first = Envelope::decode(&fs::read(file.path())?)?;
        file.write(&tree("a: 1\n"), &pass)?;
        let second = Envelope::decode(&fs::read(file.path())?)?;

        assert_ne!(first.iv, second.iv);
        assert_ne!(first.salt, second.salt);
        assert_ne!(first.ciphertext, second.ciphertext);
        Ok(())
    }

    #[test]
    fn test_update_on_empty_store_prompts_for_new_passphrase() -> Result<()> {
        let tmp = TempDir::new()?;
        let file = fast_file(&tmp);
        let labels = std::cell::RefCell::new(Vec::new());
        let prompt = |label: &str| -> Result<Passphrase> {
            labels.borrow_mut().push(label.to_string());
            Ok(Passphrase::from("pw"))
        };

        file.update(None, &prompt, |t| {
            accessor::set(t, &path("a/b"), Value::from("x"))?;
            Ok(())
        })?;
        assert_eq!(*labels.borrow(), vec![NEW_PASSPHRASE_PROMPT.to_string()]);

        let reloaded = file.read(Some(&Passphrase::from("pw")), &never)?;
        assert_eq!(
            accessor::get(&reloaded.tree, &path("a/b")),
            Some(&Value::from("x"))
        );
        Ok(())
    }

    #[test]
    fn test_update_existing_prompts_once() -> Result<()> {
        let tmp = TempDir::new()?;
        let file = fast_file(&tmp);
        file.write(&tree("a: 1\n"), &Passphrase::from("pw"))?;

        let calls = Cell::new(0);
        let prompt = |_: &str| -> Result<Passphrase> {
            calls.set(calls.get() + 1);
            Ok(Passphrase::from("pw"))
        };
        file.update(None, &prompt, |t| {
            accessor::set(t, &path("b"), Value::from(2))?;
            Ok(())
        })?;

        assert_eq!(calls.get(), 1);
        assert_eq!(file.decrypt(&Passphrase::from("pw"))?, tree("a: 1\nb: 2\n"));
        Ok(())
    }

    #[test]
    fn test_failed_mutation_leaves_file_untouched() -> Result<()> {
        let tmp = TempDir::new()?;
        let file = fast_file(&tmp);
        file.write(&tree("a: leaf\n"), &Passphrase::from("pw"))?;
        let before = fs::read(file.path())?;

        let result = file.update(Some(&Passphrase::from("pw")), &never, |t| {
            accessor::set(t, &path("a/b"), Value::from(1))?;
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(fs::read(file.path())?, before);
        Ok(())
    }

    #[test]
    fn test_failed_new_file_mutation_creates_nothing() -> Result<()> {
        let tmp = TempDir::new()?;
        let file = fast_file(&tmp);

        let result: Result<()> = file.update(None, &never, |_| bail!("refused"));
        assert!(result.is_err());
        assert!(!file.exists());
        Ok(())
    }

    #[test]
    fn test_delete_prunes_then_root_persists_empty() -> Result<()> {
        let tmp = TempDir::new()?;
        let file = fast_file(&tmp);
        let pass = Passphrase::from("pw");
        file.write(&tree("a:\n  b: 1\n  c: 2\n"), &pass)?;

        file.delete(Some(&pass), &never, &path("a/b"))?;
        assert_eq!(file.decrypt(&pass)?, tree("a:\n  c: 2\n"));

        let removed = file.delete(Some(&pass), &never, &path("a/c"))?;
        assert_eq!(removed, Some(Value::from(2)));
        assert!(file.exists());
        assert!(file.decrypt(&pass)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_legacy_envelope_is_readable_and_upgraded() -> Result<()> {
        let tmp = TempDir::new()?;
        let file = fast_file(&tmp);
        let pass = Passphrase::from("pw");

        let key = file.kdf().derive_key(&pass, &LEGACY_SALT)?;
        let (ciphertext, iv) = cipher::encrypt(b"{'a': {'b': 1}}", &key)?;
        let legacy = Envelope {
            ciphertext,
            iv: iv.to_vec(),
            salt: None,
        };
        fs::write(file.path(), legacy.encode()?)?;

        assert_eq!(file.envelope_version()?, Some(EnvelopeVersion::Legacy));
        assert_eq!(file.decrypt(&pass)?, tree("a:\n  b: 1\n"));

        file.update(Some(&pass), &never, |_| Ok(()))?;
        assert_eq!(file.envelope_version()?, Some(EnvelopeVersion::Salted));
        assert_eq!(file.decrypt(&pass)?, tree("a:\n  b: 1\n"));
        Ok(())
    }

    #[test]
    fn test_corrupt_file_fails_before_prompting() -> Result<()> {
        let tmp = TempDir::new()?;
        let file = fast_file(&tmp);
        fs::write(file.path(), b"garbage")?;

        let err = file.read(None, &never).unwrap_err();
        assert!(matches!(
            VaultError::kind(&err),
            Some(VaultError::CorruptEnvelope(_))
        ));
        Ok(())
    }

    #[test]
    fn test_write_creates_parent_dirs_with_private_mode() -> Result<()> {
        let tmp = TempDir::new()?;
        let file = SecretsFile::new(tmp.path().join("nested/deeper/vault"))
            .with_kdf(KdfParams::with_iterations(1_000));

        file.write(&tree("a: 1\n"), &Passphrase::from("pw"))?;
        let mode = fs::metadata(file.path())?.permissions().mode() & 0o777;
        assert_eq!(mode, FILE_MODE);

        let leftovers: Vec<_> = fs::read_dir(tmp.path().join("nested/deeper"))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        Ok(())
    }

    #[test]
    fn test_rekey() -> Result<()> {
        let tmp = TempDir::new()?;
        let file = fast_file(&tmp);
        file.write(&tree("a: 1\n"), &Passphrase::from("old"))?;

        file.rekey(Some(&Passphrase::from("old")), &never, &Passphrase::from("new"))?;

        assert!(file.read(Some(&Passphrase::from("old")), &never).is_err());
        assert_eq!(file.decrypt(&Passphrase::from("new"))?, tree("a: 1\n"));
        Ok(())
    }

    #[test]
    fn test_empty_passphrase_rejected() -> Result<()> {
        let tmp = TempDir::new()?;
        let file = fast_file(&tmp);
        assert!(file.write(&tree("a: 1\n"), &Passphrase::from("")).is_err());
        assert!(!file.exists());
        Ok(())
    }
}
