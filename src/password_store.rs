//! Persists and rotates the per-slot password vector.
//!
//! File format: `{"passwords": [...]}`, one 4-character lowercase ASCII
//! string per slot. Reloaded from disk on every check so an operator can
//! rotate passwords externally (editing the file directly) without a
//! restart.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const PASSWORD_LEN: usize = 4;
const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Serialize, Deserialize)]
struct PasswordFile {
    passwords: Vec<String>,
}

/// Owns the password file path and serializes all file I/O on a mutex.
#[derive(Debug)]
pub struct PasswordStore {
    path: PathBuf,
    slot_count: usize,
    io_lock: Mutex<()>,
}

impl PasswordStore {
    pub fn new(path: impl Into<PathBuf>, slot_count: usize) -> Self {
        Self {
            path: path.into(),
            slot_count,
            io_lock: Mutex::new(()),
        }
    }

    /// Loads the current passwords, generating and persisting a fresh set
    /// if the file does not exist yet.
    pub async fn load(&self) -> Result<Vec<String>> {
        let _guard = self.io_lock.lock().await;
        self.load_locked()
    }

    fn load_locked(&self) -> Result<Vec<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let file: PasswordFile = serde_json::from_str(&contents)
                    .with_context(|| format!("malformed password file: {}", self.path.display()))?;
                Ok(file.passwords)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let passwords = generate_passwords(self.slot_count);
                self.save_locked(&passwords)?;
                Ok(passwords)
            }
            Err(e) => Err(e).with_context(|| format!("failed to read {}", self.path.display())),
        }
    }

    fn save_locked(&self, passwords: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
            set_mode(parent, 0o700)?;
        }
        let file = PasswordFile {
            passwords: passwords.to_vec(),
        };
        let contents = serde_json::to_string(&file)?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        set_mode(&self.path, 0o600)?;
        Ok(())
    }

    /// Checks `index` against `[0, slot_count)` and whether `password`
    /// matches the stored password for that slot, reloading from disk
    /// first.
    pub async fn check(&self, index: usize, password: &str) -> Result<bool> {
        let _guard = self.io_lock.lock().await;
        if index >= self.slot_count {
            return Ok(false);
        }
        let passwords = self.load_locked()?;
        Ok(passwords.get(index).map(String::as_str) == Some(password))
    }

    /// Regenerates passwords for `indices` (or every slot, if empty) and
    /// persists the result, returning the full updated vector.
    pub async fn regenerate(&self, indices: &[usize]) -> Result<Vec<String>> {
        let _guard = self.io_lock.lock().await;
        let mut passwords = self.load_locked()?;
        let targets: Vec<usize> = if indices.is_empty() {
            (0..self.slot_count).collect()
        } else {
            indices.iter().copied().filter(|i| *i < self.slot_count).collect()
        };
        for index in targets {
            passwords[index] = generate_password();
        }
        self.save_locked(&passwords)?;
        Ok(passwords)
    }

    /// Returns every password, for the admin `pad:status` report.
    pub async fn all(&self) -> Result<Vec<String>> {
        let _guard = self.io_lock.lock().await;
        self.load_locked()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn generate_password() -> String {
    let mut rng = rand::rng();
    (0..PASSWORD_LEN)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

fn generate_passwords(count: usize) -> Vec<String> {
    (0..count).map(|_| generate_password()).collect()
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
