//! The VFS façade: mount table plus path resolver, per spec.md §4.5.

use std::sync::Arc;

use kos_core::error::{KError, KResult};

use crate::dentry::DentryCache;
use crate::mount::{FileSystem, MountTable};
use crate::path::{self, MAX_SYMLINK_FOLLOWS};
use crate::vnode::{Access, AccessContext, InodeType, VNode};

/// The top-level virtual filesystem: a mount table plus a dentry cache,
/// exposing path resolution to callers (`kos-kernel`'s dispatch facade).
#[derive(Default)]
pub struct Vfs {
    mounts: MountTable,
    dentries: DentryCache,
}

impl Vfs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounts `fs` at `path`.
    pub fn mount(&mut self, path: impl Into<String>, fs: Arc<dyn FileSystem>) {
        self.mounts.mount(path, fs);
    }

    /// Unmounts whatever is mounted at exactly `path`.
    pub fn unmount(&mut self, path: &str) -> Option<Arc<dyn FileSystem>> {
        self.mounts.unmount(path)
    }

    /// `true` if the mount owning `abs_path` is read-only.
    #[must_use]
    pub fn is_read_only(&self, abs_path: &str) -> bool {
        self.mounts
            .longest_prefix(abs_path)
            .map(|(_, fs)| fs.read_only())
            .unwrap_or(false)
    }

    /// Resolves `path` (relative to `ctx.cwd` if not absolute) to a vnode,
    /// implementing the seven-step algorithm of spec.md §4.5: canonicalize,
    /// split, walk from root requiring execute permission at each
    /// directory, follow symlinks up to [`MAX_SYMLINK_FOLLOWS`], jump
    /// mount-points, and reject root-escaping `..` (already absorbed by
    /// [`path::canonicalize`]).
    ///
    /// # Errors
    ///
    /// Returns [`KError::NotFound`] if any component is absent,
    /// [`KError::SymlinkLoop`] past the follow limit, [`KError::NameTooLong`]
    /// past [`path::PATH_MAX`], or [`KError::PermissionDenied`] if a
    /// directory along the walk denies execute access.
    pub fn resolve(&self, raw_path: &str, cwd: &str, access: &AccessContext) -> KResult<Arc<dyn VNode>> {
        let canonical = path::canonicalize(raw_path, cwd)?;
        self.resolve_canonical(&canonical, access, 0)
    }

    fn resolve_canonical(&self, abs_path: &str, access: &AccessContext, depth: usize) -> KResult<Arc<dyn VNode>> {
        if depth > MAX_SYMLINK_FOLLOWS {
            return Err(KError::SymlinkLoop);
        }

        let (mount_path, fs) = self.mounts.longest_prefix(abs_path).ok_or(KError::NotFound)?;
        let mut current = fs.root();
        let remainder = self.mounts.strip_mount_prefix(abs_path, mount_path);
        if remainder.is_empty() {
            return Ok(current);
        }

        let mut resolved_prefix = mount_path.trim_end_matches('/').to_string();
        for component in path::components(remainder) {
            let dir_stat = current.stat()?;
            if dir_stat.vtype != InodeType::Directory {
                return Err(KError::NotDirectory);
            }
            if !crate::vnode::check_access(dir_stat.mode, dir_stat.uid, dir_stat.gid, access, Access::Execute) {
                return Err(KError::PermissionDenied);
            }

            let parent_id = current.inode_id();
            let next = if let Some(cached) = self.dentries.get(parent_id, component) {
                cached
            } else {
                let looked_up = current.lookup(component)?;
                self.dentries.insert(parent_id, component, looked_up.clone());
                looked_up
            };

            resolved_prefix = format!("{resolved_prefix}/{component}");

            current = if next.inode_type() == InodeType::Symlink {
                let target = next.read_link()?;
                let target_abs = if path::is_absolute(&target) {
                    target
                } else {
                    let (parent, _) = path::split_parent(&resolved_prefix).unwrap_or_else(|_| ("/".to_string(), String::new()));
                    format!("{parent}/{target}")
                };
                self.resolve_canonical(&target_abs, access, depth + 1)?
            } else {
                next
            };
        }

        Ok(current)
    }

    /// Invalidates cached dentries under `parent`, e.g. after `unlink`,
    /// `rmdir`, or `rename` affecting that directory's entries.
    pub fn invalidate(&self, parent: kos_core::id::InodeId) {
        self.dentries.invalidate_children_of(parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ramfs::RamFs;
    use crate::vnode::Mode;

    fn ctx() -> AccessContext {
        AccessContext::root()
    }

    #[test]
    fn resolve_walks_nested_directories() {
        let mut vfs = Vfs::new();
        let fs = Arc::new(RamFs::new(None));
        vfs.mount("/", fs.clone());
        let sub = fs.root().mkdir("a", Mode::from_octal(0o755)).unwrap();
        sub.create("b.txt", InodeType::Regular, Mode::from_octal(0o644)).unwrap();

        let resolved = vfs.resolve("/a/b.txt", "/", &ctx()).unwrap();
        assert_eq!(resolved.inode_type(), InodeType::Regular);
    }

    #[test]
    fn resolve_relative_path_uses_cwd() {
        let mut vfs = Vfs::new();
        let fs = Arc::new(RamFs::new(None));
        vfs.mount("/", fs.clone());
        fs.root().create("x.txt", InodeType::Regular, Mode::from_octal(0o644)).unwrap();

        let resolved = vfs.resolve("x.txt", "/", &ctx()).unwrap();
        assert_eq!(resolved.inode_type(), InodeType::Regular);
    }

    #[test]
    fn resolve_missing_component_is_not_found() {
        let mut vfs = Vfs::new();
        vfs.mount("/", Arc::new(RamFs::new(None)));
        assert_eq!(vfs.resolve("/nope", "/", &ctx()).unwrap_err(), KError::NotFound);
    }

    #[test]
    fn resolve_follows_symlink() {
        let mut vfs = Vfs::new();
        let fs = Arc::new(RamFs::new(None));
        vfs.mount("/", fs.clone());
        fs.root().create("real.txt", InodeType::Regular, Mode::from_octal(0o644)).unwrap();
        fs.root().symlink("link.txt", "/real.txt").unwrap();

        let resolved = vfs.resolve("/link.txt", "/", &ctx()).unwrap();
        assert_eq!(resolved.inode_type(), InodeType::Regular);
    }

    #[test]
    fn resolve_detects_symlink_loop() {
        let mut vfs = Vfs::new();
        let fs = Arc::new(RamFs::new(None));
        vfs.mount("/", fs.clone());
        fs.root().symlink("a", "/b").unwrap();
        fs.root().symlink("b", "/a").unwrap();

        assert_eq!(vfs.resolve("/a", "/", &ctx()).unwrap_err(), KError::SymlinkLoop);
    }

    #[test]
    fn resolve_crosses_mount_point() {
        let mut vfs = Vfs::new();
        let root_fs = Arc::new(RamFs::new(None));
        let data_fs = Arc::new(RamFs::new(None));
        vfs.mount("/", root_fs);
        vfs.mount("/mnt", data_fs.clone());
        data_fs.root().create("f.txt", InodeType::Regular, Mode::from_octal(0o644)).unwrap();

        let resolved = vfs.resolve("/mnt/f.txt", "/", &ctx()).unwrap();
        assert_eq!(resolved.inode_type(), InodeType::Regular);
    }

    #[test]
    fn resolve_denies_execute_without_permission() {
        let mut vfs = Vfs::new();
        let fs = Arc::new(RamFs::new(None));
        vfs.mount("/", fs.clone());
        let sub = fs.root().mkdir("locked", Mode::from_octal(0o600)).unwrap();
        sub.create("f.txt", InodeType::Regular, Mode::from_octal(0o644)).unwrap();
        sub.setattr(None, Some(7), None).unwrap();

        let unprivileged = AccessContext {
            uid: 1000,
            gid: 1000,
            bypass_permissions: false,
        };
        assert_eq!(vfs.resolve("/locked/f.txt", "/", &unprivileged).unwrap_err(), KError::PermissionDenied);
    }
}
