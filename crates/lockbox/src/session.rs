//! Unlock sessions
//!
//! A [`Session`] owns everything an invocation needs to reach the secrets:
//! the file, the prompt, a cache of the decrypted tree, and any passphrase
//! supplied programmatically. No process-wide state; any number of sessions
//! can coexist.
//!
//! Unlocking is reentrant. The outermost [`Session::unlock`] reads the file
//! (prompting at most once) and caches the tree; nested unlocks only bump a
//! depth counter. The cache is dropped when the outermost guard goes away.
//!
//! Readers get a shared snapshot of the tree, never a borrow of the session,
//! so holding one across an update or past the end of the scope is fine. A
//! snapshot taken before an update keeps showing the old tree.
//!
//! Passphrase overrides are a separate stack. While an override guard is
//! alive its passphrase answers every prompt the session would otherwise
//! show, whether or not the session is unlocked.

use crate::accessor;
use crate::error::VaultError;
use crate::path::KeyPath;
use crate::prompt::{Passphrase, PasswordPrompt};
use crate::store::{self, Contents, SecretsFile};
use crate::tree::SecretsTree;
use anyhow::{bail, Result};
use serde_yaml::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// What the outermost unlock read
struct Unlocked {
    tree: Rc<SecretsTree>,
    passphrase: Option<Passphrase>,
}

impl From<Contents> for Unlocked {
    fn from(contents: Contents) -> Self {
        Self {
            tree: Rc::new(contents.tree),
            passphrase: contents.passphrase,
        }
    }
}

#[derive(Default)]
struct State {
    depth: usize,
    cached: Option<Unlocked>,
    overrides: Vec<Passphrase>,
}

/// Request-scoped handle on one secrets file
pub struct Session {
    file: SecretsFile,
    prompt: Box<dyn PasswordPrompt>,
    state: RefCell<State>,
}

impl Session {
    pub fn new(file: SecretsFile, prompt: Box<dyn PasswordPrompt>) -> Self {
        Self {
            file,
            prompt,
            state: RefCell::new(State::default()),
        }
    }

    pub fn file(&self) -> &SecretsFile {
        &self.file
    }

    /// Enter an unlock scope.
    ///
    /// The outermost entry reads (and on an existing file, decrypts) the
    /// file; nested entries reuse the cache. On failure no scope is entered.
    pub fn unlock(&self) -> Result<UnlockGuard<'_>> {
        let needs_read = self.state.borrow().depth == 0;
        if needs_read {
            let supplied = self.current_override();
            let contents = self.file.read(supplied.as_ref(), self.prompt.as_ref())?;
            tracing::debug!(path = %self.file.path().display(), "Unlocked");
            self.state.borrow_mut().cached = Some(contents.into());
        }

        self.state.borrow_mut().depth += 1;
        Ok(UnlockGuard { session: self })
    }

    pub fn is_unlocked(&self) -> bool {
        self.state.borrow().depth > 0
    }

    /// Snapshot of the decrypted tree; fails outside an unlock scope
    pub fn tree(&self) -> Result<Rc<SecretsTree>> {
        match &self.state.borrow().cached {
            Some(unlocked) => Ok(Rc::clone(&unlocked.tree)),
            None => bail!(VaultError::NotUnlocked),
        }
    }

    /// Copy of the value at `path`; `None` if absent
    pub fn get(&self, path: &KeyPath) -> Result<Option<Value>> {
        let tree = self.tree()?;
        Ok(accessor::get(&tree, path).cloned())
    }

    /// Passphrase the tree was unlocked with, if the file existed
    pub fn passphrase(&self) -> Result<Option<Passphrase>> {
        let state = self.state.borrow();
        match &state.cached {
            Some(unlocked) => Ok(unlocked.passphrase.clone()),
            None => bail!(VaultError::NotUnlocked),
        }
    }

    /// Supply a passphrase programmatically until the guard drops
    pub fn override_passphrase(&self, passphrase: Passphrase) -> PassphraseGuard<'_> {
        self.state.borrow_mut().overrides.push(passphrase);
        PassphraseGuard { session: self }
    }

    /// Read, mutate, write.
    ///
    /// Inside an unlock scope the cached tree stands in for the read and is
    /// refreshed after the write; outside one this is the store's update.
    /// Returns the mutator's output.
    pub fn update<T>(&self, mutate: impl FnOnce(&mut SecretsTree) -> Result<T>) -> Result<T> {
        let supplied = self.current_override();

        if !self.is_unlocked() {
            return self
                .file
                .update(supplied.as_ref(), self.prompt.as_ref(), mutate);
        }

        let (mut tree, known) = {
            let state = self.state.borrow();
            let unlocked = state.cached.as_ref().ok_or(VaultError::NotUnlocked)?;
            (SecretsTree::clone(&unlocked.tree), unlocked.passphrase.clone())
        };

        let output = mutate(&mut tree)?;
        let passphrase = match known.or(supplied.clone()) {
            Some(passphrase) => passphrase,
            None => store::new_passphrase(None, self.prompt.as_ref())?,
        };
        self.file.write(&tree, &passphrase)?;

        self.state.borrow_mut().cached = Some(Unlocked {
            tree: Rc::new(tree),
            passphrase: Some(passphrase),
        });
        Ok(output)
    }

    /// Store `value` at `path`; returns the replaced value
    pub fn set(&self, path: &KeyPath, value: Value) -> Result<Option<Value>> {
        self.update(|tree| accessor::set(tree, path, value))
    }

    /// Delete with pruning; returns the removed value
    pub fn delete(&self, path: &KeyPath) -> Result<Option<Value>> {
        self.update(|tree| Ok(accessor::delete(tree, path)))
    }

    /// Re-encrypt everything under `new`
    pub fn rekey(&self, new: &Passphrase) -> Result<usize> {
        let _unlocked = self.unlock()?;
        let tree = self.tree()?;
        let written = self.file.write(&tree, new)?;

        self.state.borrow_mut().cached = Some(Unlocked {
            tree,
            passphrase: Some(new.clone()),
        });
        Ok(written)
    }

    fn current_override(&self) -> Option<Passphrase> {
        self.state.borrow().overrides.last().cloned()
    }
}

/// Keeps an unlock scope open; the outermost one clears the cache on drop
#[must_use = "the unlock scope ends when the guard is dropped"]
pub struct UnlockGuard<'s> {
    session: &'s Session,
}

impl<'s> UnlockGuard<'s> {
    pub fn tree(&self) -> Result<Rc<SecretsTree>> {
        self.session.tree()
    }
}

impl Drop for UnlockGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.session.state.borrow_mut();
        state.depth -= 1;
        if state.depth == 0 {
            state.cached = None;
            tracing::debug!("Locked");
        }
    }
}

/// Keeps a passphrase override active
#[must_use = "the override ends when the guard is dropped"]
pub struct PassphraseGuard<'s> {
    session: &'s Session,
}

impl Drop for PassphraseGuard<'_> {
    fn drop(&mut self) {
        self.session.state.borrow_mut().overrides.pop();
    }
}
