//! flatcryptfs - Encrypted in-memory flat filesystem
//!
//! This library provides a FUSE filesystem with a single flat namespace
//! whose file content is only ever held sealed with AES-256-GCM under a
//! key that persists across mounts.

pub mod config;
pub mod content;
pub mod crypto;
pub mod error;
pub mod fs;
pub mod metadata;

pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::fs::{EncryptedFs, FlatCryptFs};
    pub use crate::metadata::AttrRecord;
}
