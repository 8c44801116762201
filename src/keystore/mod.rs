// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Key Store
//!
//! Persistent, password-encrypted store of named key material shared by every
//! tenant validator.
//!
//! Features:
//! - Named secrets, Ed25519 key pairs and X.509 certificates
//! - Created on first open with a default token-signing secret
//! - Encrypted at rest (PBKDF2 + AES-256-GCM, see [`file`])
//! - Lock-free for readers beyond a shared `RwLock`; writes only on explicit
//!   add/rotate/remove

mod entry;
pub mod file;

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

pub use entry::{KeyAlgorithm, KeyAlias, KeyEntry, PublicKey, RsaDigest};
pub use file::DEFAULT_KDF_ROUNDS;

/// Alias of the symmetric key generated when a store is first created.
pub const DEFAULT_SIGNING_ALIAS: &str = "token-signing";

/// Length in bytes of generated secrets.
pub const SECRET_LEN: usize = 64;

const STORE_FORMAT_VERSION: u32 = 1;

/// Serialises first-run creation inside this process.
static INIT_GUARD: Mutex<()> = Mutex::new(());

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("key store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("key store password rejected")]
    BadPassword,

    #[error("key store is corrupt: {0}")]
    Corrupt(String),

    #[error("no key stored under alias '{0}'")]
    NotFound(KeyAlias),

    #[error("alias '{0}' is already in use")]
    AlreadyExists(KeyAlias),

    #[error("key '{alias}' is a {actual}, expected {expected}")]
    WrongType {
        alias: KeyAlias,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("invalid key material for '{alias}': {reason}")]
    InvalidKey { alias: KeyAlias, reason: String },

    #[error("key store crypto failure: {0}")]
    Crypto(String),
}

impl KeyStoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        KeyStoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

// =============================================================================
// Options
// =============================================================================

/// Tuning for newly created stores.
#[derive(Debug, Clone)]
pub struct KeyStoreOptions {
    /// PBKDF2 rounds used when writing. Existing files keep the round count
    /// recorded in their header.
    pub kdf_rounds: u32,
}

impl Default for KeyStoreOptions {
    fn default() -> Self {
        Self {
            kdf_rounds: DEFAULT_KDF_ROUNDS,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct StoreContents {
    version: u32,
    entries: BTreeMap<KeyAlias, KeyEntry>,
}

// =============================================================================
// Key Store
// =============================================================================

/// Password-protected key store backed by a single file.
pub struct KeyStore {
    path: PathBuf,
    password: SecretString,
    kdf_rounds: u32,
    entries: RwLock<BTreeMap<KeyAlias, KeyEntry>>,
    /// Held across read-modify-persist so concurrent mutations do not lose writes.
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("path", &self.path)
            .field("entries", &self.read_entries().len())
            .finish_non_exhaustive()
    }
}

impl KeyStore {
    /// Open the store at `location`, creating it if the file does not exist.
    pub fn open(location: impl AsRef<Path>, password: &SecretString) -> Result<Self, KeyStoreError> {
        Self::open_with_options(location, password, KeyStoreOptions::default())
    }

    /// Open with explicit options.
    pub fn open_with_options(
        location: impl AsRef<Path>,
        password: &SecretString,
        options: KeyStoreOptions,
    ) -> Result<Self, KeyStoreError> {
        let path = location.as_ref().to_path_buf();
        let _guard = INIT_GUARD.lock().unwrap_or_else(PoisonError::into_inner);

        match fs::read(&path) {
            Ok(data) => Self::load(path, password, &data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::create(path, password, options),
            Err(e) => Err(KeyStoreError::io(&path, e)),
        }
    }

    fn load(path: PathBuf, password: &SecretString, data: &[u8]) -> Result<Self, KeyStoreError> {
        let (plaintext, kdf_rounds) = file::open(password.expose_secret().as_bytes(), data)?;
        let contents: StoreContents = serde_json::from_slice(&plaintext)
            .map_err(|e| KeyStoreError::Corrupt(format!("unreadable entries: {e}")))?;
        if contents.version != STORE_FORMAT_VERSION {
            return Err(KeyStoreError::Corrupt(format!(
                "unsupported store version {}",
                contents.version
            )));
        }
        for (alias, entry) in &contents.entries {
            entry.check(alias)?;
        }

        info!(path = %path.display(), entries = contents.entries.len(), "key store loaded");

        Ok(Self {
            path,
            password: SecretString::new(password.expose_secret().clone()),
            kdf_rounds,
            entries: RwLock::new(contents.entries),
            write_lock: Mutex::new(()),
        })
    }

    fn create(
        path: PathBuf,
        password: &SecretString,
        options: KeyStoreOptions,
    ) -> Result<Self, KeyStoreError> {
        let mut entries = BTreeMap::new();
        entries.insert(
            KeyAlias::from(DEFAULT_SIGNING_ALIAS),
            KeyEntry::generate_secret(SECRET_LEN),
        );
        let sealed = seal_entries(password, options.kdf_rounds, &entries)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| KeyStoreError::io(parent, e))?;
        }

        // Publish with link semantics: the link fails if another process
        // created the store first, in which case its store wins.
        let staged = staging_path(&path);
        write_synced(&staged, &sealed)?;
        let linked = fs::hard_link(&staged, &path);
        let _ = fs::remove_file(&staged);
        match linked {
            Ok(()) => {
                info!(path = %path.display(), alias = DEFAULT_SIGNING_ALIAS, "created key store with default signing key");
                Ok(Self {
                    path,
                    password: SecretString::new(password.expose_secret().clone()),
                    kdf_rounds: options.kdf_rounds,
                    entries: RwLock::new(entries),
                    write_lock: Mutex::new(()),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "key store created concurrently, loading it");
                let data = fs::read(&path).map_err(|e| KeyStoreError::io(&path, e))?;
                Self::load(path, password, &data)
            }
            Err(e) => Err(KeyStoreError::io(&path, e)),
        }
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Look up an entry.
    pub fn get(&self, alias: &KeyAlias) -> Result<KeyEntry, KeyStoreError> {
        self.read_entries()
            .get(alias)
            .cloned()
            .ok_or_else(|| KeyStoreError::NotFound(alias.clone()))
    }

    pub fn contains(&self, alias: &KeyAlias) -> bool {
        self.read_entries().contains_key(alias)
    }

    /// All aliases with their entry kind.
    pub fn aliases(&self) -> Vec<(KeyAlias, &'static str)> {
        self.read_entries()
            .iter()
            .map(|(alias, entry)| (alias.clone(), entry.kind()))
            .collect()
    }

    /// Symmetric key bytes of a secret entry.
    pub fn secret(&self, alias: &KeyAlias) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        match self.read_entries().get(alias) {
            Some(KeyEntry::Secret { material }) => Ok(Zeroizing::new(material.clone())),
            Some(other) => Err(KeyStoreError::WrongType {
                alias: alias.clone(),
                expected: "secret",
                actual: other.kind(),
            }),
            None => Err(KeyStoreError::NotFound(alias.clone())),
        }
    }

    /// Verification key of a key pair or certificate entry.
    pub fn public_key(&self, alias: &KeyAlias) -> Result<PublicKey, KeyStoreError> {
        match self.read_entries().get(alias) {
            Some(entry) => entry.public_key(alias),
            None => Err(KeyStoreError::NotFound(alias.clone())),
        }
    }

    /// Ed25519 signing key of a key pair entry.
    pub fn signing_key(&self, alias: &KeyAlias) -> Result<ed25519_dalek::SigningKey, KeyStoreError> {
        match self.read_entries().get(alias) {
            Some(entry) => entry.ed25519_signing_key(alias),
            None => Err(KeyStoreError::NotFound(alias.clone())),
        }
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Add a new entry. Fails if the alias is taken.
    pub fn add(&self, alias: KeyAlias, entry: KeyEntry) -> Result<(), KeyStoreError> {
        entry.check(&alias)?;
        self.mutate(|entries| {
            if entries.contains_key(&alias) {
                return Err(KeyStoreError::AlreadyExists(alias.clone()));
            }
            entries.insert(alias.clone(), entry);
            Ok(())
        })?;
        info!(alias = %alias, "key added");
        Ok(())
    }

    /// Remove an entry.
    pub fn remove(&self, alias: &KeyAlias) -> Result<(), KeyStoreError> {
        self.mutate(|entries| {
            entries
                .remove(alias)
                .map(|_| ())
                .ok_or_else(|| KeyStoreError::NotFound(alias.clone()))
        })?;
        warn!(alias = %alias, "key removed");
        Ok(())
    }

    /// Replace a secret with fresh random material of the same length.
    ///
    /// Tokens signed with the previous secret stop validating immediately.
    pub fn rotate_secret(&self, alias: &KeyAlias) -> Result<(), KeyStoreError> {
        self.mutate(|entries| match entries.get(alias) {
            Some(KeyEntry::Secret { material }) => {
                let len = material.len().max(32);
                entries.insert(alias.clone(), KeyEntry::generate_secret(len));
                Ok(())
            }
            Some(other) => Err(KeyStoreError::WrongType {
                alias: alias.clone(),
                expected: "secret",
                actual: other.kind(),
            }),
            None => Err(KeyStoreError::NotFound(alias.clone())),
        })?;
        info!(alias = %alias, "secret rotated");
        Ok(())
    }

    /// Generate and store a new Ed25519 key pair, returning its public half.
    pub fn generate_key_pair(&self, alias: KeyAlias) -> Result<PublicKey, KeyStoreError> {
        let entry = KeyEntry::generate_ed25519();
        let public = entry.public_key(&alias)?;
        self.add(alias, entry)?;
        Ok(public)
    }

    /// Store an X.509 certificate (DER), returning its subject public key.
    pub fn import_certificate(&self, alias: KeyAlias, der: Vec<u8>) -> Result<PublicKey, KeyStoreError> {
        let entry = KeyEntry::Certificate { der };
        let public = entry.public_key(&alias)?;
        self.add(alias, entry)?;
        Ok(public)
    }

    /// Apply `change` to a copy of the entries, persist it, then publish it.
    /// A failed persist leaves the in-memory store untouched.
    fn mutate<F>(&self, change: F) -> Result<(), KeyStoreError>
    where
        F: FnOnce(&mut BTreeMap<KeyAlias, KeyEntry>) -> Result<(), KeyStoreError>,
    {
        let _write = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut updated = self.read_entries().clone();
        change(&mut updated)?;

        let sealed = seal_entries(&self.password, self.kdf_rounds, &updated)?;
        let staged = staging_path(&self.path);
        write_synced(&staged, &sealed)?;
        fs::rename(&staged, &self.path).map_err(|e| {
            let _ = fs::remove_file(&staged);
            KeyStoreError::io(&self.path, e)
        })?;

        *self.write_entries() = updated;
        Ok(())
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, BTreeMap<KeyAlias, KeyEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, BTreeMap<KeyAlias, KeyEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn seal_entries(
    password: &SecretString,
    rounds: u32,
    entries: &BTreeMap<KeyAlias, KeyEntry>,
) -> Result<Vec<u8>, KeyStoreError> {
    let contents = StoreContents {
        version: STORE_FORMAT_VERSION,
        entries: entries.clone(),
    };
    let json = Zeroizing::new(
        serde_json::to_vec(&contents).map_err(|e| KeyStoreError::Corrupt(e.to_string()))?,
    );
    file::seal(password.expose_secret().as_bytes(), rounds, &json)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    path.with_file_name(name)
}

fn write_synced(path: &Path, data: &[u8]) -> Result<(), KeyStoreError> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| KeyStoreError::io(path, e))?;
    file.write_all(data)
        .and_then(|_| file.sync_all())
        .map_err(|e| {
            let _ = fs::remove_file(path);
            KeyStoreError::io(path, e)
        })
}
