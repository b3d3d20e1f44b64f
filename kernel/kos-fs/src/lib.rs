//! VNode model, path resolver, dentry cache, mount table, and the
//! mandatory in-memory filesystem.

pub mod dentry;
pub mod mount;
pub mod path;
pub mod ramfs;
pub mod vfs;
pub mod vnode;

pub use dentry::DentryCache;
pub use mount::{FileSystem, FsDriverRegistry, Mount, MountTable};
pub use ramfs::RamFs;
pub use vfs::Vfs;
pub use vnode::{Access, AccessContext, DirEntry, FileStat, InodeType, Mode, VNode, XattrOps};
