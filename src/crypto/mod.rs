//! Cryptography module for flatcryptfs
//!
//! Provides AES-256-GCM encryption under a single randomly generated key
//! that is persisted once and reloaded on every start.

mod encryption;
mod keys;

pub use encryption::{Cipher, SealedBlob};
pub use keys::{DataKey, KeyRecord, KeyStore};

/// Size of AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Leading version byte of every sealed blob
pub const BLOB_VERSION: u8 = 1;
