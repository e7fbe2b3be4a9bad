//! Filesystem operation handler
//!
//! Path-based implementation of every filesystem verb on top of the
//! metadata table, the content store and the cipher.
//!
//! File content is transcoded as a whole on every access: the full token is
//! decrypted, the plaintext is sliced or spliced in a local buffer, and the
//! full result is encrypted again. Work per call is O(file size) no matter
//! how small the requested range is; in exchange no plaintext outlives the
//! call that needed it. `content.max_file_size` caps the cost.

use crate::config::{Config, StatfsConfig};
use crate::content::{Blob, ContentStore};
use crate::crypto::Cipher;
use crate::error::{Error, Result};
use crate::fs::locks::PathLocks;
use crate::metadata::{leaf_name, xattr, AttrRecord, FileKind, MetadataTable, ROOT};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

/// A directory entry returned by [`EncryptedFs::readdir`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
}

/// The encrypted, flat, in-memory filesystem
pub struct EncryptedFs {
    /// Cipher bound to the active key
    cipher: Arc<Cipher>,
    /// Path -> attribute record
    metadata: MetadataTable,
    /// Path -> sealed content or link target
    content: ContentStore,
    /// Serializes operations on the same path
    locks: PathLocks,
    /// Handle counter for create/open
    next_fh: AtomicU64,
    /// Figures reported by statfs
    statfs: StatfsConfig,
    /// Plaintext size ceiling
    max_file_size: u64,
    /// Emit audit records
    audit: bool,
    /// Owner of newly created entries
    uid: u32,
    gid: u32,
}

impl EncryptedFs {
    /// Create an empty filesystem owned by the current process user
    pub fn new(cipher: Arc<Cipher>, config: &Config) -> Self {
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self::with_owner(cipher, config, uid, gid)
    }

    /// Create an empty filesystem whose entries belong to `uid`/`gid`
    pub fn with_owner(cipher: Arc<Cipher>, config: &Config, uid: u32, gid: u32) -> Self {
        EncryptedFs {
            cipher,
            metadata: MetadataTable::new(uid, gid),
            content: ContentStore::new(),
            locks: PathLocks::new(),
            next_fh: AtomicU64::new(1),
            statfs: config.statfs.clone(),
            max_file_size: config.content.max_file_size,
            audit: config.logging.audit,
            uid,
            gid,
        }
    }

    /// Audit record: verb, path and byte count. Never content.
    fn audit(&self, verb: &'static str, path: &str, bytes: u64) {
        if self.audit {
            info!(target: "flatcryptfs::audit", verb, path, bytes, "audit");
        }
    }

    fn alloc_fh(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::Relaxed)
    }

    fn check_size(&self, size: u64) -> Result<()> {
        if size > self.max_file_size {
            return Err(Error::FileTooLarge {
                size,
                limit: self.max_file_size,
            });
        }
        Ok(())
    }

    /// Fetch the record of a regular file
    fn require_file(&self, path: &str) -> Result<AttrRecord> {
        let record = self.metadata.get(path)?;
        match record.kind() {
            FileKind::RegularFile => Ok(record),
            FileKind::Directory => Err(Error::IsADirectory(path.to_string())),
            FileKind::Symlink => Err(Error::NotAFile(path.to_string())),
        }
    }

    /// Decrypt the whole content of `path`. Authentication failures propagate.
    fn load_plaintext(&self, path: &str) -> Result<Zeroizing<Vec<u8>>> {
        let token = self
            .content
            .get_sealed(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;

        self.cipher.decrypt(&token).map(Zeroizing::new).map_err(|e| {
            error!("Failed to decrypt {}: {}", path, e);
            e
        })
    }

    /// Decrypt the whole content of `path`, starting from empty plaintext if
    /// the blob is missing or fails authentication. Overwriting is how a
    /// file sealed under a lost key is recovered.
    fn load_plaintext_or_empty(&self, path: &str) -> Zeroizing<Vec<u8>> {
        let Some(token) = self.content.get_sealed(path) else {
            return Zeroizing::new(Vec::new());
        };

        match self.cipher.decrypt(&token) {
            Ok(plaintext) => Zeroizing::new(plaintext),
            Err(e) => {
                warn!("Discarding undecryptable content of {}: {}", path, e);
                Zeroizing::new(Vec::new())
            }
        }
    }

    /// Encrypt `plaintext` and store it as the content of `path`
    fn store_plaintext(&self, path: &str, plaintext: &[u8]) -> Result<()> {
        let token = self.cipher.encrypt(plaintext)?;
        self.content.put(path, Blob::Sealed(token));
        Ok(())
    }

    /// Attributes of `path`
    pub fn getattr(&self, path: &str) -> Result<AttrRecord> {
        self.metadata.get(path)
    }

    /// Create an empty regular file and return a handle
    pub fn create(&self, path: &str, mode: u32) -> Result<u64> {
        leaf_name(path)?;
        let _guard = self.locks.lock(path);

        if self.metadata.contains(path) {
            return Err(Error::AlreadyExists(path.to_string()));
        }

        // Content first: a visible record always has a blob behind it
        self.store_plaintext(path, b"")?;
        if let Err(e) = self
            .metadata
            .insert(path, AttrRecord::new_file(mode, self.uid, self.gid))
        {
            self.content.remove(path);
            return Err(e);
        }

        self.audit("create", path, 0);
        Ok(self.alloc_fh())
    }

    /// Check that `path` exists and return a handle
    pub fn open(&self, path: &str) -> Result<u64> {
        if !self.metadata.contains(path) {
            return Err(Error::NotFound(path.to_string()));
        }
        Ok(self.alloc_fh())
    }

    /// Read up to `size` bytes at `offset`. Short reads at end of file.
    pub fn read(&self, path: &str, offset: u64, size: usize) -> Result<Vec<u8>> {
        let _guard = self.locks.lock(path);
        self.require_file(path)?;

        let plaintext = self.load_plaintext(path)?;

        let len = plaintext.len();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(len);
        let end = start.saturating_add(size).min(len);

        self.audit("read", path, (end - start) as u64);
        Ok(plaintext[start..end].to_vec())
    }

    /// Write `data` at `offset`, zero-filling any gap past the current end.
    /// Returns the number of bytes accepted.
    pub fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<usize> {
        let _guard = self.locks.lock(path);
        self.require_file(path)?;

        if data.is_empty() {
            return Ok(0);
        }

        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(Error::FileTooLarge {
                size: u64::MAX,
                limit: self.max_file_size,
            })?;
        self.check_size(end)?;

        let current = self.load_plaintext_or_empty(path);

        // Bounded by max_file_size above
        let offset = offset as usize;
        let end = end as usize;
        let new_len = current.len().max(end);

        let mut plaintext = Zeroizing::new(Vec::with_capacity(new_len));
        plaintext.extend_from_slice(&current);
        plaintext.resize(new_len, 0);
        plaintext[offset..end].copy_from_slice(data);
        drop(current);

        self.store_plaintext(path, &plaintext)?;
        self.metadata.update(path, |r| r.set_size(new_len as u64))?;

        self.audit("write", path, data.len() as u64);
        Ok(data.len())
    }

    /// Cut or zero-extend the content of `path` to `length` bytes
    pub fn truncate(&self, path: &str, length: u64) -> Result<()> {
        let _guard = self.locks.lock(path);
        self.require_file(path)?;
        self.check_size(length)?;

        let current = self.load_plaintext_or_empty(path);

        let length = length as usize;
        let keep = current.len().min(length);

        let mut plaintext = Zeroizing::new(Vec::with_capacity(length));
        plaintext.extend_from_slice(&current[..keep]);
        plaintext.resize(length, 0);
        drop(current);

        self.store_plaintext(path, &plaintext)?;
        self.metadata.update(path, |r| r.set_size(length as u64))?;

        self.audit("truncate", path, length as u64);
        Ok(())
    }

    /// Remove a file or symbolic link
    pub fn unlink(&self, path: &str) -> Result<()> {
        leaf_name(path)?;
        let _guard = self.locks.lock(path);

        if self.metadata.get(path)?.is_dir() {
            return Err(Error::IsADirectory(path.to_string()));
        }

        // Record first: the path is gone before its blob is
        self.metadata.remove(path)?;
        self.content.remove(path);

        self.audit("unlink", path, 0);
        Ok(())
    }

    /// Move `old` to `new` with its content and attributes, replacing `new`
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        leaf_name(old)?;
        leaf_name(new)?;
        let _guard = self.locks.lock_pair(old, new);

        let source = self.metadata.get(old)?;
        if old == new {
            return Ok(());
        }

        if let Ok(target) = self.metadata.get(new) {
            if target.is_dir() && !source.is_dir() {
                return Err(Error::IsADirectory(new.to_string()));
            }
            if !target.is_dir() && source.is_dir() {
                return Err(Error::NotADirectory(new.to_string()));
            }
        }

        if self.content.contains(old) {
            self.content.rename(old, new)?;
        } else {
            self.content.remove(new);
        }
        self.metadata.rename(old, new)?;

        self.audit("rename", old, 0);
        self.audit("rename-to", new, 0);
        Ok(())
    }

    /// Create a directory under the root
    pub fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        leaf_name(path)?;
        let _guard = self.locks.lock(path);

        self.metadata
            .insert(path, AttrRecord::new_directory(mode, self.uid, self.gid))?;

        self.audit("mkdir", path, 0);
        Ok(())
    }

    /// Remove a directory. Emptiness is not checked: nothing can live
    /// below a child of the root in a flat namespace.
    pub fn rmdir(&self, path: &str) -> Result<()> {
        leaf_name(path)?;
        let _guard = self.locks.lock(path);

        if !self.metadata.get(path)?.is_dir() {
            return Err(Error::NotADirectory(path.to_string()));
        }
        self.metadata.remove(path)?;

        self.audit("rmdir", path, 0);
        Ok(())
    }

    /// Create a symbolic link at `path` pointing to `target`
    pub fn symlink(&self, path: &str, target: &str) -> Result<()> {
        leaf_name(path)?;
        let _guard = self.locks.lock(path);

        if self.metadata.contains(path) {
            return Err(Error::AlreadyExists(path.to_string()));
        }

        self.content.put(path, Blob::Link(target.to_string()));
        if let Err(e) = self
            .metadata
            .insert(path, AttrRecord::new_symlink(target, self.uid, self.gid))
        {
            self.content.remove(path);
            return Err(e);
        }

        self.audit("symlink", path, target.len() as u64);
        Ok(())
    }

    /// Target of the symbolic link at `path`
    pub fn readlink(&self, path: &str) -> Result<String> {
        if !self.metadata.get(path)?.is_symlink() {
            return Err(Error::NotASymlink(path.to_string()));
        }

        match self.content.get(path) {
            Some(Blob::Link(target)) => Ok(target),
            _ => Err(Error::NotFound(path.to_string())),
        }
    }

    /// Replace the permission bits of `path`, keeping its type
    pub fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        self.metadata.update(path, |r| r.set_perm(mode))?;
        self.audit("chmod", path, 0);
        Ok(())
    }

    /// Change owner and/or group of `path`
    pub fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        self.metadata.update(path, |r| {
            if let Some(uid) = uid {
                r.uid = uid;
            }
            if let Some(gid) = gid {
                r.gid = gid;
            }
            r.ctime = SystemTime::now();
        })?;
        self.audit("chown", path, 0);
        Ok(())
    }

    /// Set access and modify times; `None` means now for both
    pub fn utimens(&self, path: &str, times: Option<(SystemTime, SystemTime)>) -> Result<()> {
        let now = SystemTime::now();
        let (atime, mtime) = times.unwrap_or((now, now));

        self.metadata.update(path, |r| {
            r.atime = atime;
            r.mtime = mtime;
            r.ctime = now;
        })?;
        self.audit("utimens", path, 0);
        Ok(())
    }

    /// Value of extended attribute `name`; empty when not set
    pub fn getxattr(&self, path: &str, name: &str) -> Result<Vec<u8>> {
        self.metadata.inspect(path, |r| xattr::get(&r.xattrs, name))?
    }

    pub fn setxattr(&self, path: &str, name: &str, value: &[u8]) -> Result<()> {
        self.metadata
            .update(path, |r| xattr::set(&mut r.xattrs, name, value))??;
        self.audit("setxattr", path, value.len() as u64);
        Ok(())
    }

    /// Remove extended attribute `name`; removing an unset name succeeds
    pub fn removexattr(&self, path: &str, name: &str) -> Result<()> {
        self.metadata
            .update(path, |r| xattr::remove(&mut r.xattrs, name))??;
        self.audit("removexattr", path, 0);
        Ok(())
    }

    pub fn listxattr(&self, path: &str) -> Result<Vec<String>> {
        self.metadata.inspect(path, |r| xattr::list(&r.xattrs))
    }

    /// Synthetic capacity figures
    pub fn statfs(&self) -> StatfsConfig {
        self.statfs.clone()
    }

    /// Entries of the directory at `path`, without `.` and `..`.
    /// Only the root has children.
    pub fn readdir(&self, path: &str) -> Result<Vec<DirEntry>> {
        if !self.metadata.get(path)?.is_dir() {
            return Err(Error::NotADirectory(path.to_string()));
        }

        if path != ROOT {
            return Ok(Vec::new());
        }

        Ok(self
            .metadata
            .list_children()
            .into_iter()
            .map(|(name, kind)| DirEntry { name, kind })
            .collect())
    }
}
