//! FUSE adapter
//!
//! Translates kernel requests, addressed by inode number, into path-based
//! calls on [`EncryptedFs`].

use crate::error::{Error, Result};
use crate::fs::handler::EncryptedFs;
use crate::fs::inode::{InodeTable, ROOT_INO};
use crate::metadata::{xattr, ROOT};

use fuser::{
    FileAttr, FileType as FuserFileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, ReplyXattr, Request,
    TimeOrNow,
};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error};

/// TTL for cached attributes
const TTL: Duration = Duration::from_secs(1);

/// Mountable filesystem
pub struct FlatCryptFs {
    /// Path-based operation handler
    fs: Arc<EncryptedFs>,
    /// Inode numbers handed to the kernel
    inodes: InodeTable,
}

/// How to answer an xattr request of `size` bytes for a `len`-byte value
#[derive(Debug, PartialEq, Eq)]
enum XattrFit {
    /// Size probe: report the length
    Size(u32),
    /// Value fits: send it
    Data,
}

fn xattr_fit(len: usize, size: u32) -> std::result::Result<XattrFit, libc::c_int> {
    if size == 0 {
        u32::try_from(len)
            .map(XattrFit::Size)
            .map_err(|_| libc::E2BIG)
    } else if len <= size as usize {
        Ok(XattrFit::Data)
    } else {
        Err(libc::ERANGE)
    }
}

fn reply_xattr(data: &[u8], size: u32, reply: ReplyXattr) {
    match xattr_fit(data.len(), size) {
        Ok(XattrFit::Size(len)) => reply.size(len),
        Ok(XattrFit::Data) => reply.data(data),
        Err(errno) => reply.error(errno),
    }
}

fn resolve_time(time: Option<TimeOrNow>, current: SystemTime, now: SystemTime) -> SystemTime {
    match time {
        Some(TimeOrNow::SpecificTime(t)) => t,
        Some(TimeOrNow::Now) => now,
        None => current,
    }
}

impl FlatCryptFs {
    /// Create a new adapter over `fs`
    pub fn new(fs: Arc<EncryptedFs>) -> Self {
        FlatCryptFs {
            fs,
            inodes: InodeTable::new(),
        }
    }

    /// The handler behind this adapter
    pub fn handler(&self) -> &Arc<EncryptedFs> {
        &self.fs
    }

    fn path(&self, ino: u64) -> Result<String> {
        self.inodes
            .path(ino)
            .ok_or_else(|| Error::NotFound(format!("inode {}", ino)))
    }

    /// Path of `name` under inode `parent`. Non-UTF-8 names are rejected
    /// with EINVAL.
    fn child(&self, parent: u64, name: &OsStr) -> std::result::Result<String, libc::c_int> {
        let name = name.to_str().ok_or(libc::EINVAL)?;
        let parent_path = self.path(parent).map_err(|e| e.to_errno())?;
        Ok(InodeTable::child_path(&parent_path, name))
    }

    /// Attributes of `path` with its inode number
    fn attr(&self, path: &str) -> Result<FileAttr> {
        let record = self.fs.getattr(path)?;
        Ok(record.to_fuser(self.inodes.ino(path)))
    }

    /// Apply a setattr request and return the resulting attributes
    #[allow(clippy::too_many_arguments)]
    fn apply_setattr(
        &self,
        path: &str,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
    ) -> Result<FileAttr> {
        if let Some(mode) = mode {
            self.fs.chmod(path, mode)?;
        }
        if uid.is_some() || gid.is_some() {
            self.fs.chown(path, uid, gid)?;
        }
        if let Some(size) = size {
            self.fs.truncate(path, size)?;
        }
        if atime.is_some() || mtime.is_some() {
            let current = self.fs.getattr(path)?;
            let now = SystemTime::now();
            let times = (
                resolve_time(atime, current.atime, now),
                resolve_time(mtime, current.mtime, now),
            );
            self.fs.utimens(path, Some(times))?;
        }

        self.attr(path)
    }

    /// Entries of directory `ino`, including `.` and `..`
    fn dir_entries(&self, ino: u64) -> Result<Vec<(u64, FuserFileType, String)>> {
        let path = self.path(ino)?;
        let children = self.fs.readdir(&path)?;

        let mut entries = vec![
            (ino, FuserFileType::Directory, ".".to_string()),
            (ROOT_INO, FuserFileType::Directory, "..".to_string()),
        ];
        for child in children {
            let child_ino = self.inodes.ino(&InodeTable::child_path(ROOT, &child.name));
            entries.push((child_ino, child.kind.to_fuser(), child.name));
        }

        Ok(entries)
    }
}

impl Filesystem for FlatCryptFs {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = match self.child(parent, name) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        debug!("lookup: parent={}, path={}", parent, path);

        match self.attr(&path) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn forget(&mut self, _req: &Request, ino: u64, _nlookup: u64) {
        debug!("forget: ino={}", ino);

        // Live entries keep their number; only stale bindings are dropped
        if let Some(path) = self.inodes.path(ino) {
            if self.fs.getattr(&path).is_err() {
                self.inodes.remove_path(&path);
            }
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        debug!("getattr: ino={}", ino);

        match self.path(ino).and_then(|path| self.attr(&path)) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!("setattr: ino={}, mode={:?}, size={:?}", ino, mode, size);

        let result = self
            .path(ino)
            .and_then(|path| self.apply_setattr(&path, mode, uid, gid, size, atime, mtime));

        match result {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => {
                error!("setattr error: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        debug!("readlink: ino={}", ino);

        match self.path(ino).and_then(|path| self.fs.readlink(&path)) {
            Ok(target) => reply.data(target.as_bytes()),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = match self.child(parent, name) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        debug!("mkdir: path={}, mode={:o}", path, mode);

        match self.fs.mkdir(&path, mode).and_then(|_| self.attr(&path)) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => {
                error!("mkdir error: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child(parent, name) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        debug!("unlink: path={}", path);

        match self.fs.unlink(&path) {
            Ok(()) => {
                self.inodes.remove_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child(parent, name) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        debug!("rmdir: path={}", path);

        match self.fs.rmdir(&path) {
            Ok(()) => {
                self.inodes.remove_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let path = match self.child(parent, link_name) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let target = match target.to_str() {
            Some(t) => t,
            None => {
                reply.error(libc::EINVAL);
                return;
            }
        };

        debug!("symlink: path={}", path);

        match self.fs.symlink(&path, target).and_then(|_| self.attr(&path)) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => {
                error!("symlink error: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (old, new) = match (self.child(parent, name), self.child(newparent, newname)) {
            (Ok(old), Ok(new)) => (old, new),
            (Err(errno), _) | (_, Err(errno)) => {
                reply.error(errno);
                return;
            }
        };

        debug!("rename: {} -> {}", old, new);

        match self.fs.rename(&old, &new) {
            Ok(()) => {
                self.inodes.rename(&old, &new);
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("open: ino={}, flags={}", ino, flags);

        let path = match self.path(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        match self.fs.getattr(&path) {
            Ok(attr) if attr.is_dir() => {
                reply.error(libc::EISDIR);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        }

        match self.fs.open(&path) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("read: ino={}, offset={}, size={}", ino, offset, size);

        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }

        let result = self
            .path(ino)
            .and_then(|path| self.fs.read(&path, offset as u64, size as usize));

        match result {
            Ok(data) => reply.data(&data),
            Err(e) => {
                error!("read error: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!("write: ino={}, offset={}, size={}", ino, offset, data.len());

        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }

        let result = self
            .path(ino)
            .and_then(|path| self.fs.write(&path, offset as u64, data));

        match result {
            Ok(written) => reply.written(written as u32),
            Err(e) => {
                error!("write error: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn flush(&mut self, _req: &Request, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        debug!("flush: ino={}, fh={}", ino, fh);
        // Every write is sealed and stored before it returns
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("release: ino={}, fh={}", ino, fh);
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        debug!("fsync: ino={}, fh={}, datasync={}", ino, fh, datasync);
        reply.ok();
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir: ino={}, offset={}", ino, offset);

        let entries = match self.dir_entries(ino) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        for (i, (ino, kind, name)) in entries.iter().enumerate().skip(offset.max(0) as usize) {
            if reply.add(*ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }

        reply.ok();
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: fuser::ReplyStatfs) {
        let stats = self.fs.statfs();
        reply.statfs(
            stats.blocks,
            stats.blocks_free,
            stats.blocks_available,
            stats.files,
            stats.files_free,
            stats.block_size,
            stats.name_max,
            stats.block_size,
        );
    }

    fn setxattr(
        &mut self,
        _req: &Request,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        let name = match name.to_str() {
            Some(n) => n,
            None => {
                reply.error(libc::EINVAL);
                return;
            }
        };

        debug!("setxattr: ino={}, name={}", ino, name);

        match self.path(ino).and_then(|path| self.fs.setxattr(&path, name, value)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn getxattr(&mut self, _req: &Request, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        let name = match name.to_str() {
            Some(n) => n,
            None => {
                reply.error(libc::EINVAL);
                return;
            }
        };

        debug!("getxattr: ino={}, name={}, size={}", ino, name, size);

        match self.path(ino).and_then(|path| self.fs.getxattr(&path, name)) {
            Ok(value) => reply_xattr(&value, size, reply),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn listxattr(&mut self, _req: &Request, ino: u64, size: u32, reply: ReplyXattr) {
        debug!("listxattr: ino={}, size={}", ino, size);

        match self.path(ino).and_then(|path| self.fs.listxattr(&path)) {
            Ok(names) => reply_xattr(&xattr::encode_names(&names), size, reply),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn removexattr(&mut self, _req: &Request, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = match name.to_str() {
            Some(n) => n,
            None => {
                reply.error(libc::EINVAL);
                return;
            }
        };

        debug!("removexattr: ino={}, name={}", ino, name);

        match self.path(ino).and_then(|path| self.fs.removexattr(&path, name)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        debug!("access: ino={}, mask={}", ino, mask);

        match self.path(ino).and_then(|path| self.fs.getattr(&path)) {
            Ok(_) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let path = match self.child(parent, name) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        debug!("create: path={}, mode={:o}, flags={}", path, mode, flags);

        let result = self
            .fs
            .create(&path, mode)
            .and_then(|fh| Ok((fh, self.attr(&path)?)));

        match result {
            Ok((fh, attr)) => reply.created(&TTL, &attr, 0, fh, 0),
            Err(e) => {
                error!("create error: {}", e);
                reply.error(e.to_errno());
            }
        }
    }
}
