//! Content store
//!
//! Holds one blob per path: the sealed token of a regular file or the
//! literal target of a symbolic link. Plaintext file content is never
//! stored here.

use crate::error::{Error, Result};
use dashmap::DashMap;
use tracing::trace;

/// Stored content for a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Blob {
    /// Authenticated-encryption token of a regular file's whole content
    Sealed(Vec<u8>),
    /// Symbolic link target, kept as plaintext
    Link(String),
}

impl Blob {
    /// Stored size in bytes
    pub fn size(&self) -> usize {
        match self {
            Blob::Sealed(token) => token.len(),
            Blob::Link(target) => target.len(),
        }
    }
}

/// Path → blob map
#[derive(Default)]
pub struct ContentStore {
    blobs: DashMap<String, Blob>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a copy of the blob for `path`
    pub fn get(&self, path: &str) -> Option<Blob> {
        self.blobs.get(path).map(|entry| entry.value().clone())
    }

    /// Get the sealed token for `path`, if the path holds one
    pub fn get_sealed(&self, path: &str) -> Option<Vec<u8>> {
        match self.blobs.get(path)?.value() {
            Blob::Sealed(token) => Some(token.clone()),
            Blob::Link(_) => None,
        }
    }

    /// Store a blob, replacing any previous one
    pub fn put(&self, path: &str, blob: Blob) {
        trace!("content put {} ({} bytes)", path, blob.size());
        self.blobs.insert(path.to_string(), blob);
    }

    /// Remove the blob for `path`
    pub fn remove(&self, path: &str) -> Option<Blob> {
        self.blobs.remove(path).map(|(_, blob)| blob)
    }

    /// Move the blob at `old` to `new`, replacing any blob at `new`
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        if old == new {
            return if self.contains(old) {
                Ok(())
            } else {
                Err(Error::NotFound(old.to_string()))
            };
        }

        let blob = self
            .remove(old)
            .ok_or_else(|| Error::NotFound(old.to_string()))?;
        self.blobs.insert(new.to_string(), blob);
        Ok(())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.blobs.contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get() {
        let store = ContentStore::new();
        store.put("/a", Blob::Sealed(vec![1, 2, 3]));

        assert_eq!(store.get("/a"), Some(Blob::Sealed(vec![1, 2, 3])));
        assert_eq!(store.get_sealed("/a"), Some(vec![1, 2, 3]));
        assert!(store.get("/b").is_none());
    }

    #[test]
    fn test_link_is_not_sealed() {
        let store = ContentStore::new();
        store.put("/l", Blob::Link("/target".to_string()));

        assert!(store.get_sealed("/l").is_none());
        assert_eq!(store.get("/l"), Some(Blob::Link("/target".to_string())));
    }

    #[test]
    fn test_remove() {
        let store = ContentStore::new();
        store.put("/a", Blob::Sealed(vec![0; 4]));

        assert!(store.remove("/a").is_some());
        assert!(store.remove("/a").is_none());
        assert!(!store.contains("/a"));
    }

    #[test]
    fn test_rename() {
        let store = ContentStore::new();
        store.put("/a", Blob::Sealed(vec![9; 8]));
        store.put("/b", Blob::Sealed(vec![1]));

        store.rename("/a", "/b").unwrap();
        assert!(!store.contains("/a"));
        assert_eq!(store.get_sealed("/b"), Some(vec![9; 8]));

        assert!(matches!(store.rename("/a", "/c"), Err(Error::NotFound(_))));
        store.rename("/b", "/b").unwrap();
    }
}
