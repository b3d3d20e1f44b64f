//! Dentry cache: a (parent inode, name) -> vnode cache sitting in front of
//! each `FileSystem`'s own `lookup`, per spec.md §4.5/§3.

use std::collections::HashMap;
use std::sync::Arc;

use kos_core::id::InodeId;
use parking_lot::RwLock;

use crate::vnode::VNode;

/// Caches the resolution of (parent inode id, child name) pairs.
///
/// A cache hit always yields the same vnode a fresh `FileSystem::lookup`
/// would, because invalidation is the only way an entry disappears: the
/// cache never returns a stale vnode after invalidation, only `None`
/// (forcing a fresh lookup), per spec.md §4.5's dentry cache invariant.
pub struct DentryCache {
    entries: RwLock<HashMap<(InodeId, String), Arc<dyn VNode>>>,
}

impl DentryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached vnode for (`parent`, `name`), if present.
    #[must_use]
    pub fn get(&self, parent: InodeId, name: &str) -> Option<Arc<dyn VNode>> {
        self.entries.read().get(&(parent, name.to_string())).cloned()
    }

    /// Populates the cache entry for (`parent`, `name`).
    pub fn insert(&self, parent: InodeId, name: &str, vnode: Arc<dyn VNode>) {
        self.entries.write().insert((parent, name.to_string()), vnode);
    }

    /// Invalidates a single (`parent`, `name`) binding, e.g. after
    /// `unlink`/`rename`.
    pub fn invalidate(&self, parent: InodeId, name: &str) {
        self.entries.write().remove(&(parent, name.to_string()));
    }

    /// Invalidates every entry whose parent is `parent`, e.g. after
    /// `rmdir` or a directory-wide rename. Propagating to grandchildren is
    /// unnecessary: grandchildren are keyed by their own (now-stale)
    /// parent inode id, which is only reachable by first re-resolving
    /// through this now-invalidated entry.
    pub fn invalidate_children_of(&self, parent: InodeId) {
        self.entries.write().retain(|(p, _), _| *p != parent);
    }
}

impl Default for DentryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ramfs::RamFs;
    use crate::FileSystem;

    #[test]
    fn cache_hit_then_invalidate_forces_fresh_lookup() {
        let fs = RamFs::new(None);
        let root = fs.root();
        let file = root.create("a.txt", crate::vnode::InodeType::Regular, crate::vnode::Mode::from_octal(0o644)).unwrap();

        let cache = DentryCache::new();
        assert!(cache.get(root.inode_id(), "a.txt").is_none());
        cache.insert(root.inode_id(), "a.txt", file.clone());
        assert!(cache.get(root.inode_id(), "a.txt").is_some());

        cache.invalidate(root.inode_id(), "a.txt");
        assert!(cache.get(root.inode_id(), "a.txt").is_none());
    }

    #[test]
    fn invalidate_children_of_clears_only_that_parent() {
        let cache = DentryCache::new();
        let fs = RamFs::new(None);
        let root = fs.root();
        let file = root.create("a.txt", crate::vnode::InodeType::Regular, crate::vnode::Mode::from_octal(0o644)).unwrap();
        cache.insert(root.inode_id(), "a.txt", file);
        cache.insert(InodeId::new(999), "other", fs.root());

        cache.invalidate_children_of(root.inode_id());
        assert!(cache.get(root.inode_id(), "a.txt").is_none());
        assert!(cache.get(InodeId::new(999), "other").is_some());
    }
}
