//! Error types for flatcryptfs

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for flatcryptfs
#[derive(Error, Debug)]
pub enum Error {
    // Crypto errors
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Ciphertext failed authentication: wrong key, corruption or tampering.
    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Key record is corrupt: {0}")]
    KeyCorrupt(String),

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    // Namespace errors
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("Not a symbolic link: {0}")]
    NotASymlink(String),

    #[error("Nested paths are not supported: {0}")]
    NestedPath(String),

    #[error("The root directory cannot be removed or renamed")]
    RootEntry,

    // Attribute errors
    #[error("Invalid extended attribute: {0}")]
    InvalidXattr(String),

    #[error("File too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convert to libc errno for FUSE
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Error::NotFound(_) => libc::ENOENT,
            Error::AlreadyExists(_) => libc::EEXIST,
            Error::NotADirectory(_) => libc::ENOTDIR,
            Error::IsADirectory(_) => libc::EISDIR,
            Error::NotAFile(_) | Error::NotASymlink(_) | Error::InvalidXattr(_) => libc::EINVAL,
            Error::NestedPath(_) => libc::ENOTSUP,
            Error::RootEntry => libc::EBUSY,
            Error::FileTooLarge { .. } => libc::EFBIG,
            Error::Config(_) | Error::InvalidConfig(_) => libc::EINVAL,
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            _ => libc::EIO,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
