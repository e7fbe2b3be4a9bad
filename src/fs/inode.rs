//! Inode number assignment
//!
//! The kernel addresses entries by inode number while the handler works on
//! paths. Numbers are handed out on first sight of a path and follow the
//! entry across renames. Root is always inode 1.

use crate::metadata::ROOT;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Inode number of the root directory
pub const ROOT_INO: u64 = 1;

struct Inner {
    paths: HashMap<u64, String>,
    inos: HashMap<String, u64>,
    next: u64,
}

/// Bidirectional inode <-> path map
pub struct InodeTable {
    inner: RwLock<Inner>,
}

impl InodeTable {
    pub fn new() -> Self {
        let mut paths = HashMap::new();
        let mut inos = HashMap::new();
        paths.insert(ROOT_INO, ROOT.to_string());
        inos.insert(ROOT.to_string(), ROOT_INO);

        InodeTable {
            inner: RwLock::new(Inner {
                paths,
                inos,
                next: ROOT_INO + 1,
            }),
        }
    }

    /// Path of a child `name` under `parent_path`
    pub fn child_path(parent_path: &str, name: &str) -> String {
        if parent_path == ROOT {
            format!("/{}", name)
        } else {
            format!("{}/{}", parent_path, name)
        }
    }

    /// Path currently bound to `ino`
    pub fn path(&self, ino: u64) -> Option<String> {
        self.inner.read().paths.get(&ino).cloned()
    }

    /// Inode number of `path`, assigning a fresh one on first use
    pub fn ino(&self, path: &str) -> u64 {
        if let Some(ino) = self.inner.read().inos.get(path) {
            return *ino;
        }

        let mut inner = self.inner.write();
        if let Some(ino) = inner.inos.get(path) {
            return *ino;
        }

        let ino = inner.next;
        inner.next += 1;
        inner.paths.insert(ino, path.to_string());
        inner.inos.insert(path.to_string(), ino);
        ino
    }

    /// Rebind the inode of `old` to `new`, dropping whatever `new` had
    pub fn rename(&self, old: &str, new: &str) {
        if old == new {
            return;
        }

        let mut inner = self.inner.write();
        if let Some(replaced) = inner.inos.remove(new) {
            inner.paths.remove(&replaced);
        }
        if let Some(ino) = inner.inos.remove(old) {
            inner.paths.insert(ino, new.to_string());
            inner.inos.insert(new.to_string(), ino);
        }
    }

    /// Drop the binding of a removed path
    pub fn remove_path(&self, path: &str) {
        if path == ROOT {
            return;
        }

        let mut inner = self.inner.write();
        if let Some(ino) = inner.inos.remove(path) {
            inner.paths.remove(&ino);
        }
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_one() {
        let table = InodeTable::new();
        assert_eq!(table.ino(ROOT), ROOT_INO);
        assert_eq!(table.path(ROOT_INO).as_deref(), Some(ROOT));
    }

    #[test]
    fn test_child_path() {
        assert_eq!(InodeTable::child_path("/", "a"), "/a");
        assert_eq!(InodeTable::child_path("/d", "a"), "/d/a");
    }

    #[test]
    fn test_assignment_is_stable() {
        let table = InodeTable::new();
        let a = table.ino("/a");
        let b = table.ino("/b");

        assert_ne!(a, b);
        assert_ne!(a, ROOT_INO);
        assert_eq!(table.ino("/a"), a);
        assert_eq!(table.path(b).as_deref(), Some("/b"));
        assert!(table.path(999).is_none());
    }

    #[test]
    fn test_rename_keeps_number() {
        let table = InodeTable::new();
        let a = table.ino("/a");
        let b = table.ino("/b");

        table.rename("/a", "/b");
        assert_eq!(table.ino("/b"), a);
        assert!(table.path(b).is_none());
        assert_ne!(table.ino("/a"), a);
    }

    #[test]
    fn test_remove_path() {
        let table = InodeTable::new();
        let a = table.ino("/a");
        table.remove_path("/a");

        assert!(table.path(a).is_none());
        assert_ne!(table.ino("/a"), a);

        table.remove_path(ROOT);
        assert_eq!(table.path(ROOT_INO).as_deref(), Some(ROOT));
    }
}
