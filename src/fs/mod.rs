//! Filesystem layer
//!
//! [`EncryptedFs`] implements every operation on paths. [`FlatCryptFs`]
//! adapts it to the FUSE interface.

mod filesystem;
mod handler;
mod inode;
mod locks;

pub use filesystem::FlatCryptFs;
pub use handler::{DirEntry, EncryptedFs};
pub use inode::{InodeTable, ROOT_INO};
pub use locks::{PathGuard, PathLocks};
