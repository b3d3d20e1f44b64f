//! The VNode model: the universal file object and the mode-bit permission
//! check, per spec.md §3/§4.5.
//!
//! Each `FileSystem` driver's inodes implement [`VNode`] directly rather
//! than returning boxed futures: the hosted simulation runs one OS thread
//! per simulated CPU and blocking syscalls park on condvars (see
//! `kos_core::sync::WaitQueue`), so there is no async runtime to leak into
//! this trait.

use std::sync::Arc;

use bitflags::bitflags;
use kos_core::error::{KError, KResult};
use kos_core::id::InodeId;

bitflags! {
    /// The 12 POSIX mode bits: 9 permission bits plus setuid/setgid/sticky.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Mode: u16 {
        const OWNER_R = 0o400;
        const OWNER_W = 0o200;
        const OWNER_X = 0o100;
        const GROUP_R = 0o040;
        const GROUP_W = 0o020;
        const GROUP_X = 0o010;
        const OTHER_R = 0o004;
        const OTHER_W = 0o002;
        const OTHER_X = 0o001;
        const SETUID  = 0o4000;
        const SETGID  = 0o2000;
        const STICKY  = 0o1000;
    }
}

impl Mode {
    /// Builds a `Mode` from a raw octal permission value (e.g. `0o644`).
    #[must_use]
    pub const fn from_octal(bits: u16) -> Self {
        Self::from_bits_truncate(bits)
    }
}

/// The kind of file object a [`VNode`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InodeType {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

/// The access a caller is requesting, checked against [`Mode`]'s owner,
/// group, and other triads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Execute,
}

/// The identity and bypass state a resolver/vnode-op caller presents.
///
/// `bypass_permissions` is set by the caller (`kos-kernel`'s dispatch
/// facade) when the acting process holds `ROOT` or the relevant
/// `FILE_R`/`FILE_W`/`FILE_X` capability flag; `kos-fs` has no dependency
/// on `kos-cap` (see the dependency order in spec.md §2), so the bypass
/// decision is made by the caller and handed in rather than looked up here.
#[derive(Debug, Clone, Copy)]
pub struct AccessContext {
    pub uid: u32,
    pub gid: u32,
    pub bypass_permissions: bool,
}

impl AccessContext {
    #[must_use]
    pub fn root() -> Self {
        Self {
            uid: 0,
            gid: 0,
            bypass_permissions: true,
        }
    }
}

/// Checks `mode`'s owner/group/other bits against `ctx`'s uid/gid for the
/// requested `access`, per spec.md §4.5 ("owner/group/other bits against
/// process uid/gid, ROOT bypass").
#[must_use]
pub fn check_access(mode: Mode, file_uid: u32, file_gid: u32, ctx: &AccessContext, access: Access) -> bool {
    if ctx.bypass_permissions {
        return true;
    }
    let (owner_bit, group_bit, other_bit) = match access {
        Access::Read => (Mode::OWNER_R, Mode::GROUP_R, Mode::OTHER_R),
        Access::Write => (Mode::OWNER_W, Mode::GROUP_W, Mode::OTHER_W),
        Access::Execute => (Mode::OWNER_X, Mode::GROUP_X, Mode::OTHER_X),
    };
    if ctx.uid == file_uid {
        mode.contains(owner_bit)
    } else if ctx.gid == file_gid {
        mode.contains(group_bit)
    } else {
        mode.contains(other_bit)
    }
}

/// A `stat`/`fstat` result, mirroring POSIX `struct stat`'s relevant fields.
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub inode: InodeId,
    pub vtype: InodeType,
    pub mode: Mode,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime_nanos: u64,
    pub mtime_nanos: u64,
    pub ctime_nanos: u64,
    pub nlink: u32,
}

/// One entry returned by [`VNode::readdir`].
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub inode: InodeId,
    pub vtype: InodeType,
}

/// Extended-attribute accessors, kept minimal: name/value pairs of bytes.
pub trait XattrOps {
    /// # Errors
    /// Returns [`KError::NotFound`] if `name` is unset.
    fn xattr_get(&self, name: &str) -> KResult<Vec<u8>>;
    fn xattr_set(&self, name: &str, value: &[u8]) -> KResult<()>;
    fn xattr_list(&self) -> KResult<Vec<String>>;
    /// # Errors
    /// Returns [`KError::NotFound`] if `name` is unset.
    fn xattr_remove(&self, name: &str) -> KResult<()>;
}

/// The universal file object, per spec.md §3's VNode data model.
///
/// Implementors own their data (a `RamFs` file's bytes, a `DevFs` device's
/// behavior); the VFS layer only ever holds `Arc<dyn VNode>` handles,
/// mirroring the teacher's `devfs.rs` inode trait shape with blocking
/// methods in place of boxed futures.
pub trait VNode: Send + Sync {
    /// Supports downcasting to a concrete driver's inode type, needed by
    /// `link`/`rename` to mutate a same-filesystem target's internal
    /// state (nlink, directory contents) that the trait itself doesn't
    /// expose generically.
    fn as_any(&self) -> &dyn std::any::Any;

    fn inode_id(&self) -> InodeId;
    fn inode_type(&self) -> InodeType;
    fn stat(&self) -> KResult<FileStat>;
    fn setattr(&self, mode: Option<Mode>, uid: Option<u32>, gid: Option<u32>) -> KResult<()>;

    /// # Errors
    /// Returns [`KError::IsDirectory`] for directories.
    fn read(&self, offset: u64, buf: &mut [u8]) -> KResult<usize>;
    /// # Errors
    /// Returns [`KError::IsDirectory`] for directories, [`KError::ReadOnly`]
    /// on a read-only mount.
    fn write(&self, offset: u64, buf: &[u8]) -> KResult<usize>;
    fn truncate(&self, len: u64) -> KResult<()>;

    /// # Errors
    /// Returns [`KError::NotFound`] if `name` is absent,
    /// [`KError::NotDirectory`] if `self` is not a directory.
    fn lookup(&self, name: &str) -> KResult<Arc<dyn VNode>>;
    fn create(&self, name: &str, vtype: InodeType, mode: Mode) -> KResult<Arc<dyn VNode>>;
    fn mkdir(&self, name: &str, mode: Mode) -> KResult<Arc<dyn VNode>>;
    fn unlink(&self, name: &str) -> KResult<()>;
    fn rmdir(&self, name: &str) -> KResult<()>;
    fn symlink(&self, name: &str, target: &str) -> KResult<Arc<dyn VNode>>;
    fn link(&self, name: &str, target: &Arc<dyn VNode>) -> KResult<()>;

    /// Atomically rebinds `old_name` (a child of `self`) to `new_name`
    /// under `new_dir`; concurrent observers see exactly one of the old or
    /// new binding, per spec.md §4.5's atomic-rename requirement.
    fn rename(&self, old_name: &str, new_dir: &Arc<dyn VNode>, new_name: &str) -> KResult<()>;

    fn readdir(&self) -> KResult<Vec<DirEntry>>;
    /// # Errors
    /// Returns [`KError::InvalidArgument`] if `self` is not a symlink.
    fn read_link(&self) -> KResult<String>;
}
