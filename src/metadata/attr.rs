//! Attribute records
//!
//! One record per path. The mode word carries both the file type bits and
//! the permission bits, as `st_mode` does.

use std::collections::BTreeMap;
use std::time::SystemTime;

/// File type mask
pub const S_IFMT: u32 = 0o170000;
/// Directory
pub const S_IFDIR: u32 = 0o040000;
/// Regular file
pub const S_IFREG: u32 = 0o100000;
/// Symbolic link
pub const S_IFLNK: u32 = 0o120000;
/// Permission bits (including setuid/setgid/sticky)
pub const PERM_MASK: u32 = 0o7777;

/// Block size reported in attributes
pub const BLOCK_SIZE: u32 = 512;

/// Kinds of entries the filesystem supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    RegularFile,
    Symlink,
}

impl FileKind {
    /// Type bits for this kind
    pub fn mode_bits(self) -> u32 {
        match self {
            FileKind::Directory => S_IFDIR,
            FileKind::RegularFile => S_IFREG,
            FileKind::Symlink => S_IFLNK,
        }
    }

    /// Convert to fuser's FileType
    pub fn to_fuser(self) -> fuser::FileType {
        match self {
            FileKind::Directory => fuser::FileType::Directory,
            FileKind::RegularFile => fuser::FileType::RegularFile,
            FileKind::Symlink => fuser::FileType::Symlink,
        }
    }
}

/// Per-path attribute record
#[derive(Debug, Clone, PartialEq)]
pub struct AttrRecord {
    /// Type and permission bits
    pub mode: u32,
    /// Link count
    pub nlink: u32,
    /// Plaintext size in bytes (link target length for symlinks)
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    /// Creation time
    pub crtime: SystemTime,
    /// Attribute change time
    pub ctime: SystemTime,
    /// Modify time
    pub mtime: SystemTime,
    /// Access time
    pub atime: SystemTime,
    /// Extended attributes
    pub xattrs: BTreeMap<String, Vec<u8>>,
}

impl AttrRecord {
    fn new(kind: FileKind, perm: u32, nlink: u32, size: u64, uid: u32, gid: u32) -> Self {
        let now = SystemTime::now();
        AttrRecord {
            mode: kind.mode_bits() | (perm & PERM_MASK),
            nlink,
            size,
            uid,
            gid,
            crtime: now,
            ctime: now,
            mtime: now,
            atime: now,
            xattrs: BTreeMap::new(),
        }
    }

    /// A fresh, empty regular file
    pub fn new_file(perm: u32, uid: u32, gid: u32) -> Self {
        Self::new(FileKind::RegularFile, perm, 1, 0, uid, gid)
    }

    /// A fresh directory (`.` and the parent's entry give it two links)
    pub fn new_directory(perm: u32, uid: u32, gid: u32) -> Self {
        Self::new(FileKind::Directory, perm, 2, 0, uid, gid)
    }

    /// A symbolic link to `target`
    pub fn new_symlink(target: &str, uid: u32, gid: u32) -> Self {
        Self::new(FileKind::Symlink, 0o777, 1, target.len() as u64, uid, gid)
    }

    /// The kind encoded in the mode bits
    pub fn kind(&self) -> FileKind {
        match self.mode & S_IFMT {
            S_IFDIR => FileKind::Directory,
            S_IFLNK => FileKind::Symlink,
            _ => FileKind::RegularFile,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == FileKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind() == FileKind::Symlink
    }

    /// Permission bits only
    pub fn perm(&self) -> u32 {
        self.mode & PERM_MASK
    }

    /// Replace permission bits, keeping the type bits
    pub fn set_perm(&mut self, perm: u32) {
        self.mode = (self.mode & S_IFMT) | (perm & PERM_MASK);
        self.ctime = SystemTime::now();
    }

    /// Record a content change
    pub fn set_size(&mut self, size: u64) {
        let now = SystemTime::now();
        self.size = size;
        self.mtime = now;
        self.ctime = now;
    }

    /// Number of 512-byte blocks the content occupies
    pub fn blocks(&self) -> u64 {
        self.size.div_ceil(BLOCK_SIZE as u64)
    }

    /// Convert to fuser's FileAttr
    pub fn to_fuser(&self, ino: u64) -> fuser::FileAttr {
        fuser::FileAttr {
            ino,
            size: self.size,
            blocks: self.blocks(),
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
            crtime: self.crtime,
            kind: self.kind().to_fuser(),
            perm: self.perm() as u16,
            nlink: self.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_file() {
        let attr = AttrRecord::new_file(0o644, 1000, 1000);
        assert_eq!(attr.mode, S_IFREG | 0o644);
        assert_eq!(attr.kind(), FileKind::RegularFile);
        assert_eq!(attr.nlink, 1);
        assert_eq!(attr.size, 0);
        assert!(attr.xattrs.is_empty());
    }

    #[test]
    fn test_new_directory() {
        let attr = AttrRecord::new_directory(0o755, 0, 0);
        assert!(attr.is_dir());
        assert_eq!(attr.nlink, 2);
        assert_eq!(attr.perm(), 0o755);
    }

    #[test]
    fn test_new_symlink() {
        let attr = AttrRecord::new_symlink("/etc/hosts", 0, 0);
        assert!(attr.is_symlink());
        assert_eq!(attr.perm(), 0o777);
        assert_eq!(attr.size, 10);
    }

    #[test]
    fn test_set_perm_keeps_type() {
        let mut attr = AttrRecord::new_directory(0o755, 0, 0);
        attr.set_perm(0o100600);
        assert!(attr.is_dir());
        assert_eq!(attr.perm(), 0o600);
    }

    #[test]
    fn test_blocks() {
        let mut attr = AttrRecord::new_file(0o644, 0, 0);
        assert_eq!(attr.blocks(), 0);
        attr.set_size(1);
        assert_eq!(attr.blocks(), 1);
        attr.set_size(1025);
        assert_eq!(attr.blocks(), 3);
    }

    #[test]
    fn test_to_fuser() {
        let attr = AttrRecord::new_file(0o640, 42, 43);
        let fattr = attr.to_fuser(7);
        assert_eq!(fattr.ino, 7);
        assert_eq!(fattr.kind, fuser::FileType::RegularFile);
        assert_eq!(fattr.perm, 0o640);
        assert_eq!(fattr.uid, 42);
        assert_eq!(fattr.gid, 43);
    }
}
