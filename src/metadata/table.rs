//! In-memory metadata table
//!
//! Maps paths to attribute records for a single flat namespace: `/` plus
//! its direct children. Root's link count tracks the directories created
//! under it.

use crate::error::{Error, Result};
use crate::metadata::{AttrRecord, FileKind};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Path of the root directory
pub const ROOT: &str = "/";

/// Return the leaf name of a child path, rejecting anything that is not a
/// direct child of the root.
pub fn leaf_name(path: &str) -> Result<&str> {
    let name = path
        .strip_prefix('/')
        .ok_or_else(|| Error::NotFound(path.to_string()))?;

    if name.is_empty() {
        return Err(Error::RootEntry);
    }

    if name.contains('/') {
        return Err(Error::NestedPath(path.to_string()));
    }

    Ok(name)
}

/// Metadata table guarded by a single lock
pub struct MetadataTable {
    records: RwLock<HashMap<String, AttrRecord>>,
}

impl MetadataTable {
    /// Create a table holding only the root directory
    pub fn new(uid: u32, gid: u32) -> Self {
        let mut records = HashMap::new();
        records.insert(ROOT.to_string(), AttrRecord::new_directory(0o755, uid, gid));

        MetadataTable {
            records: RwLock::new(records),
        }
    }

    /// Get a copy of the record for `path`
    pub fn get(&self, path: &str) -> Result<AttrRecord> {
        self.records
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    /// Whether `path` has a record
    pub fn contains(&self, path: &str) -> bool {
        self.records.read().contains_key(path)
    }

    /// Insert or replace the record for a child of the root.
    ///
    /// Returns the replaced record, if any.
    pub fn put(&self, path: &str, record: AttrRecord) -> Result<Option<AttrRecord>> {
        leaf_name(path)?;

        let mut records = self.records.write();
        let was_dir = records.get(path).map(AttrRecord::is_dir).unwrap_or(false);
        let is_dir = record.is_dir();
        let previous = records.insert(path.to_string(), record);
        Self::adjust_root_links(&mut records, is_dir as i64 - was_dir as i64);

        Ok(previous)
    }

    /// Insert the record for a new child of the root, failing if the path is taken
    pub fn insert(&self, path: &str, record: AttrRecord) -> Result<()> {
        leaf_name(path)?;

        let mut records = self.records.write();
        if records.contains_key(path) {
            return Err(Error::AlreadyExists(path.to_string()));
        }

        if record.is_dir() {
            Self::adjust_root_links(&mut records, 1);
        }
        records.insert(path.to_string(), record);

        debug!("metadata insert {}", path);
        Ok(())
    }

    /// Remove and return the record for `path`
    pub fn remove(&self, path: &str) -> Result<AttrRecord> {
        leaf_name(path)?;

        let mut records = self.records.write();
        let record = records
            .remove(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;

        if record.is_dir() {
            Self::adjust_root_links(&mut records, -1);
        }

        debug!("metadata remove {}", path);
        Ok(record)
    }

    /// Move the record at `old` to `new`, replacing any record at `new`.
    ///
    /// Returns the replaced record, if any.
    pub fn rename(&self, old: &str, new: &str) -> Result<Option<AttrRecord>> {
        leaf_name(old)?;
        leaf_name(new)?;

        let mut records = self.records.write();
        if !records.contains_key(old) {
            return Err(Error::NotFound(old.to_string()));
        }
        if old == new {
            return Ok(None);
        }

        let mut record = records
            .remove(old)
            .ok_or_else(|| Error::NotFound(old.to_string()))?;
        record.ctime = std::time::SystemTime::now();

        let replaced = records.insert(new.to_string(), record);
        if replaced.as_ref().map(AttrRecord::is_dir).unwrap_or(false) {
            Self::adjust_root_links(&mut records, -1);
        }

        debug!("metadata rename {} -> {}", old, new);
        Ok(replaced)
    }

    /// Run `f` against the record for `path` without copying it
    pub fn inspect<F, R>(&self, path: &str, f: F) -> Result<R>
    where
        F: FnOnce(&AttrRecord) -> R,
    {
        let records = self.records.read();
        let record = records
            .get(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        Ok(f(record))
    }

    /// Apply `f` to the record for `path` in place
    pub fn update<F, R>(&self, path: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut AttrRecord) -> R,
    {
        let mut records = self.records.write();
        let record = records
            .get_mut(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        Ok(f(record))
    }

    /// Leaf names and kinds of root's children, sorted by name
    pub fn list_children(&self) -> Vec<(String, FileKind)> {
        let records = self.records.read();
        let mut children: Vec<_> = records
            .iter()
            .filter(|(path, _)| path.as_str() != ROOT)
            .map(|(path, record)| (path[1..].to_string(), record.kind()))
            .collect();
        children.sort_by(|a, b| a.0.cmp(&b.0));
        children
    }

    fn adjust_root_links(records: &mut HashMap<String, AttrRecord>, delta: i64) {
        if delta == 0 {
            return;
        }
        if let Some(root) = records.get_mut(ROOT) {
            root.nlink = (root.nlink as i64 + delta).max(2) as u32;
            root.ctime = std::time::SystemTime::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> MetadataTable {
        MetadataTable::new(1000, 1000)
    }

    fn root_links(table: &MetadataTable) -> u32 {
        table.get(ROOT).unwrap().nlink
    }

    #[test]
    fn test_root_exists() {
        let table = table();
        let root = table.get(ROOT).unwrap();
        assert!(root.is_dir());
        assert_eq!(root.nlink, 2);
        assert!(table.list_children().is_empty());
    }

    #[test]
    fn test_get_missing() {
        let table = table();
        assert!(matches!(table.get("/missing"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_leaf_name() {
        assert_eq!(leaf_name("/a").unwrap(), "a");
        assert!(matches!(leaf_name("/"), Err(Error::RootEntry)));
        assert!(matches!(leaf_name("/a/b"), Err(Error::NestedPath(_))));
        assert!(matches!(leaf_name("a"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_insert_rejects_nested_and_duplicates() {
        let table = table();
        table.insert("/a", AttrRecord::new_file(0o644, 0, 0)).unwrap();

        assert!(matches!(
            table.insert("/a", AttrRecord::new_file(0o644, 0, 0)),
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            table.insert("/d/a", AttrRecord::new_file(0o644, 0, 0)),
            Err(Error::NestedPath(_))
        ));
        assert_eq!(table.list_children().len(), 1);
    }

    #[test]
    fn test_directory_link_counts() {
        let table = table();

        table.insert("/d1", AttrRecord::new_directory(0o755, 0, 0)).unwrap();
        table.insert("/d2", AttrRecord::new_directory(0o755, 0, 0)).unwrap();
        table.insert("/f", AttrRecord::new_file(0o644, 0, 0)).unwrap();
        assert_eq!(root_links(&table), 4);

        table.remove("/d1").unwrap();
        assert_eq!(root_links(&table), 3);

        table.remove("/f").unwrap();
        assert_eq!(root_links(&table), 3);
    }

    #[test]
    fn test_put_replaces() {
        let table = table();
        assert!(table.put("/a", AttrRecord::new_file(0o644, 0, 0)).unwrap().is_none());

        let previous = table.put("/a", AttrRecord::new_directory(0o700, 0, 0)).unwrap();
        assert_eq!(previous.unwrap().kind(), FileKind::RegularFile);
        assert!(table.get("/a").unwrap().is_dir());
        assert_eq!(root_links(&table), 3);
    }

    #[test]
    fn test_remove_root_refused() {
        let table = table();
        assert!(matches!(table.remove(ROOT), Err(Error::RootEntry)));
        assert!(table.contains(ROOT));
    }

    #[test]
    fn test_rename() {
        let table = table();
        let mut record = AttrRecord::new_file(0o600, 0, 0);
        record.size = 11;
        table.insert("/old", record).unwrap();

        assert!(table.rename("/old", "/new").unwrap().is_none());
        assert!(!table.contains("/old"));
        let moved = table.get("/new").unwrap();
        assert_eq!(moved.size, 11);
        assert_eq!(moved.perm(), 0o600);
    }

    #[test]
    fn test_rename_missing() {
        let table = table();
        assert!(matches!(
            table.rename("/nope", "/new"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_rename_over_directory() {
        let table = table();
        table.insert("/f", AttrRecord::new_file(0o644, 0, 0)).unwrap();
        table.insert("/d", AttrRecord::new_directory(0o755, 0, 0)).unwrap();
        assert_eq!(root_links(&table), 3);

        let replaced = table.rename("/f", "/d").unwrap();
        assert!(replaced.unwrap().is_dir());
        assert_eq!(root_links(&table), 2);
        assert_eq!(table.list_children().len(), 1);
    }

    #[test]
    fn test_rename_onto_itself() {
        let table = table();
        table.insert("/a", AttrRecord::new_file(0o644, 0, 0)).unwrap();
        assert!(table.rename("/a", "/a").unwrap().is_none());
        assert!(table.contains("/a"));
    }

    #[test]
    fn test_update() {
        let table = table();
        table.insert("/a", AttrRecord::new_file(0o644, 0, 0)).unwrap();

        let size = table.update("/a", |r| {
            r.set_size(5);
            r.size
        });
        assert_eq!(size.unwrap(), 5);
        assert!(matches!(
            table.update("/missing", |_| ()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_list_children() {
        let table = table();
        table.insert("/b", AttrRecord::new_file(0o644, 0, 0)).unwrap();
        table.insert("/a", AttrRecord::new_directory(0o755, 0, 0)).unwrap();
        table.insert("/c", AttrRecord::new_symlink("/a", 0, 0)).unwrap();

        let children = table.list_children();
        assert_eq!(
            children,
            vec![
                ("a".to_string(), FileKind::Directory),
                ("b".to_string(), FileKind::RegularFile),
                ("c".to_string(), FileKind::Symlink),
            ]
        );
    }
}
