//! Passphrases and the interactive prompt collaborator

use anyhow::{Context, Result};
use std::io::BufRead;
use zeroize::Zeroizing;

/// A passphrase held in memory for the lifetime of a session.
///
/// Never persisted, never logged; the buffer is wiped on drop.
#[derive(Clone)]
pub struct Passphrase(Zeroizing<String>);

impl Passphrase {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Passphrase {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Passphrase {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl PartialEq for Passphrase {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Passphrase {}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Passphrase([REDACTED])")
    }
}

/// Source of passphrases when none has been supplied programmatically.
///
/// Blocking; may wait on the user indefinitely.
pub trait PasswordPrompt {
    fn prompt_password(&self, label: &str) -> Result<Passphrase>;
}

impl<F> PasswordPrompt for F
where
    F: Fn(&str) -> Result<Passphrase>,
{
    fn prompt_password(&self, label: &str) -> Result<Passphrase> {
        self(label)
    }
}

/// Prompt on the controlling terminal with echo disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl PasswordPrompt for TerminalPrompt {
    fn prompt_password(&self, label: &str) -> Result<Passphrase> {
        match rpassword::prompt_password(label) {
            Ok(value) => Ok(Passphrase::new(value)),
            Err(err) => {
                // No tty (piped input, CI); read a visible line instead
                tracing::warn!(
                    error = %err,
                    "No terminal available, reading passphrase from stdin with echo"
                );
                eprint!("{}", label);
                read_plain_line(&mut std::io::stdin().lock())
            }
        }
    }
}

fn read_plain_line(reader: &mut impl BufRead) -> Result<Passphrase> {
    let mut line = Zeroizing::new(String::new());
    reader
        .read_line(&mut line)
        .context("Failed to read passphrase")?;
    let trimmed = line.trim_end_matches(['\r', '\n']);
    Ok(Passphrase::new(trimmed))
}
