//! Key Management for flatcryptfs
//!
//! One random data key encrypts every file. It is generated on first run,
//! written to a key record, and reloaded on every later run. A record that
//! cannot be parsed is an error: replacing it would orphan all existing
//! ciphertext.

use crate::crypto::KEY_SIZE;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Current key record version
const RECORD_VERSION: u32 = 1;

/// Algorithm tag stored in the key record
const RECORD_ALGORITHM: &str = "aes-256-gcm";

/// The active data encryption key
#[derive(Clone)]
pub struct DataKey {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl DataKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        rand::thread_rng().fill_bytes(&mut key[..]);
        DataKey { key }
    }

    /// Build a key from raw bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(Error::InvalidKeyLength {
                expected: KEY_SIZE,
                got: bytes.len(),
            });
        }

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(bytes);
        Ok(DataKey { key })
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl PartialEq for DataKey {
    fn eq(&self, other: &Self) -> bool {
        ring::constant_time::verify_slices_are_equal(&self.key[..], &other.key[..])
            .is_ok()
    }
}

impl Eq for DataKey {}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DataKey(..)")
    }
}

/// On-disk key record
#[derive(Serialize, Deserialize)]
pub struct KeyRecord {
    pub version: u32,
    pub algorithm: String,
    /// Hex-encoded key material
    pub key: String,
    pub created_at: DateTime<Utc>,
}

impl KeyRecord {
    fn new(key: &DataKey) -> Self {
        KeyRecord {
            version: RECORD_VERSION,
            algorithm: RECORD_ALGORITHM.to_string(),
            key: hex::encode(key.as_bytes()),
            created_at: Utc::now(),
        }
    }

    fn to_key(&self) -> Result<DataKey> {
        if self.version != RECORD_VERSION {
            return Err(Error::KeyCorrupt(format!(
                "unsupported record version {}",
                self.version
            )));
        }

        if self.algorithm != RECORD_ALGORITHM {
            return Err(Error::KeyCorrupt(format!(
                "unsupported algorithm {:?}",
                self.algorithm
            )));
        }

        let bytes = Zeroizing::new(
            hex::decode(&self.key).map_err(|e| Error::KeyCorrupt(format!("bad key encoding: {}", e)))?,
        );

        DataKey::from_slice(&bytes).map_err(|e| Error::KeyCorrupt(e.to_string()))
    }
}

/// Durable home of the key record
#[derive(Debug, Clone)]
pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        KeyStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a key record has been written yet
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the persisted key, generating and persisting one on first run
    pub fn load_or_create(&self) -> Result<DataKey> {
        if self.exists() {
            return self.load();
        }

        let key = DataKey::generate();
        match self.persist(&key) {
            Ok(()) => {
                info!("Generated new data key at {:?}", self.path);
                Ok(key)
            }
            // Another process won the first-run race; its key is the real one
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("Key record appeared concurrently at {:?}", self.path);
                self.load()
            }
            Err(e) => Err(e),
        }
    }

    /// Load an existing key record
    pub fn load(&self) -> Result<DataKey> {
        let content = Zeroizing::new(std::fs::read_to_string(&self.path)?);

        let record: KeyRecord = serde_json::from_str(&content)
            .map_err(|e| Error::KeyCorrupt(format!("{:?}: {}", self.path, e)))?;

        let key = record.to_key()?;
        debug!("Loaded data key from {:?} (created {})", self.path, record.created_at);
        Ok(key)
    }

    /// Write a new key record. Never replaces an existing file.
    ///
    /// The record is written and synced under a temporary name in the same
    /// directory, then linked into place, so `path` only ever holds a
    /// complete record.
    fn persist(&self, key: &DataKey) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;

        let record = KeyRecord::new(key);
        let content = Zeroizing::new(serde_json::to_string_pretty(&record)?);

        let mut temp_file = tempfile::Builder::new()
            .prefix(".key-")
            .suffix(".tmp")
            .tempfile_in(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            temp_file
                .as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }

        temp_file.write_all(content.as_bytes())?;
        temp_file.as_file().sync_all()?;
        temp_file
            .persist_noclobber(&self.path)
            .map_err(|e| Error::Io(e.error))?;

        Ok(())
    }
}
