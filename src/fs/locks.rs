//! Per-path exclusive locks
//!
//! Makes `decrypt -> mutate -> encrypt -> store` atomic for one path while
//! letting different paths proceed in parallel. Locks are sharded by path
//! hash, so two paths may occasionally share a shard; that only costs
//! concurrency, never correctness.

use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Number of lock shards
const SHARDS: usize = 64;

/// Sharded lock table keyed by path
pub struct PathLocks {
    shards: Vec<Mutex<()>>,
}

/// Guard over one or two shards
pub struct PathGuard<'a> {
    _first: MutexGuard<'a, ()>,
    _second: Option<MutexGuard<'a, ()>>,
}

impl PathLocks {
    pub fn new() -> Self {
        PathLocks {
            shards: (0..SHARDS).map(|_| Mutex::new(())).collect(),
        }
    }

    fn shard_for(&self, path: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    /// Lock a single path
    pub fn lock(&self, path: &str) -> PathGuard<'_> {
        PathGuard {
            _first: self.shards[self.shard_for(path)].lock(),
            _second: None,
        }
    }

    /// Lock two paths at once. Shards are always taken in ascending order
    /// so concurrent renames cannot deadlock.
    pub fn lock_pair(&self, a: &str, b: &str) -> PathGuard<'_> {
        let (x, y) = (self.shard_for(a), self.shard_for(b));
        if x == y {
            return PathGuard {
                _first: self.shards[x].lock(),
                _second: None,
            };
        }

        let (low, high) = if x < y { (x, y) } else { (y, x) };
        let first = self.shards[low].lock();
        let second = self.shards[high].lock();
        PathGuard {
            _first: first,
            _second: Some(second),
        }
    }
}

impl Default for PathLocks {
    fn default() -> Self {
        Self::new()
    }
}
