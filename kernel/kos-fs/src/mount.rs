//! The `FileSystem` driver trait, the mount table, and the pluggable
//! driver registry, per spec.md §4.5/§4.6.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::vnode::VNode;

/// A mounted filesystem driver.
///
/// The minimal op set spec.md §4.5 requires beyond `get_root`/`type` lives
/// on [`VNode`] itself (`lookup`, `create`, `mkdir`, ...); a `FileSystem`
/// is just the thing that owns a root vnode and answers for the mount's
/// flags.
pub trait FileSystem: Send + Sync {
    /// A short, stable name (`"ramfs"`, `"devfs"`, ...) used in mount
    /// tables and diagnostics.
    fn name(&self) -> &'static str;
    /// The filesystem's root vnode.
    fn root(&self) -> Arc<dyn VNode>;
    /// `true` if the mount rejects mutating operations.
    fn read_only(&self) -> bool {
        false
    }
}

/// One entry in the mount table: where a `FileSystem` is attached.
pub struct Mount {
    pub path: String,
    pub fs: Arc<dyn FileSystem>,
}

/// The mount table, keyed by mount path. Path resolution finds the
/// longest matching prefix among mounted paths, per spec.md §4.5.
#[derive(Default)]
pub struct MountTable {
    mounts: BTreeMap<String, Arc<dyn FileSystem>>,
}

impl MountTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounts `fs` at `path`, replacing any existing mount at exactly
    /// `path`.
    pub fn mount(&mut self, path: impl Into<String>, fs: Arc<dyn FileSystem>) {
        let path = path.into();
        tracing::info!(mount_path = %path, fs = fs.name(), "filesystem mounted");
        self.mounts.insert(path, fs);
    }

    /// Removes the mount at exactly `path`, if present.
    pub fn unmount(&mut self, path: &str) -> Option<Arc<dyn FileSystem>> {
        self.mounts.remove(path)
    }

    /// Finds the longest mounted path that is a prefix of `abs_path` (at a
    /// component boundary), returning the matched path and its filesystem.
    #[must_use]
    pub fn longest_prefix(&self, abs_path: &str) -> Option<(&str, &Arc<dyn FileSystem>)> {
        self.mounts
            .iter()
            .filter(|(mount_path, _)| is_mount_prefix(mount_path, abs_path))
            .max_by_key(|(mount_path, _)| mount_path.len())
            .map(|(path, fs)| (path.as_str(), fs))
    }

    /// Returns the remainder of `abs_path` past the `mount_path` prefix,
    /// with no leading slash.
    #[must_use]
    pub fn strip_mount_prefix<'a>(&self, abs_path: &'a str, mount_path: &str) -> &'a str {
        let _ = self;
        let rest = &abs_path[mount_path.len()..];
        rest.trim_start_matches('/')
    }
}

fn is_mount_prefix(mount_path: &str, abs_path: &str) -> bool {
    if mount_path == "/" {
        return true;
    }
    abs_path == mount_path || abs_path.starts_with(&format!("{mount_path}/"))
}

/// A named registry of filesystem driver factories, letting the set of
/// pluggable filesystems (proc-like, sys-like, dev-like, ...) grow without
/// modifying the VFS core, per spec.md §4.6.
#[derive(Default)]
pub struct FsDriverRegistry {
    factories: BTreeMap<String, Arc<dyn Fn() -> Arc<dyn FileSystem> + Send + Sync>>,
}

impl FsDriverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a driver factory under `name`.
    pub fn register(&mut self, name: impl Into<String>, factory: impl Fn() -> Arc<dyn FileSystem> + Send + Sync + 'static) {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Instantiates the driver registered as `name`.
    #[must_use]
    pub fn create(&self, name: &str) -> Option<Arc<dyn FileSystem>> {
        self.factories.get(name).map(|factory| factory())
    }

    /// Returns every registered driver name.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}
