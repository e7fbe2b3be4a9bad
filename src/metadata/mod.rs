//! Metadata module
//!
//! Attribute records for every path, kept in memory only.

mod attr;
mod table;
pub mod xattr;

pub use attr::{AttrRecord, FileKind, BLOCK_SIZE, PERM_MASK, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};
pub use table::{leaf_name, MetadataTable, ROOT};
