//! The mandatory in-memory filesystem, per spec.md §4.6.
//!
//! Regular files are byte vectors, directories are name->vnode maps, all
//! guarded by one `RwLock` per inode (finer-grained than a single
//! filesystem-wide lock, matching the "VNode tables per FS driver:
//! protected by the driver's lock" model of spec.md §5 at inode
//! granularity). Nothing here survives a core restart.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use kos_core::clock::Clock;
use kos_core::error::{KError, KResult};
use kos_core::id::{IdGenerator, InodeId};
use parking_lot::{Mutex, RwLock};

use crate::mount::FileSystem;
use crate::vnode::{DirEntry, FileStat, InodeType, Mode, VNode};

/// State shared by every inode of one `RamFs` instance: id allocation, the
/// optional size quota, and a clock for timestamps.
struct RamFsShared {
    ids: IdGenerator,
    clock: Clock,
    quota_bytes: Option<u64>,
    used_bytes: Mutex<u64>,
}

impl RamFsShared {
    fn next_inode(&self) -> InodeId {
        InodeId::new(self.ids.next())
    }

    fn now(&self) -> u64 {
        self.clock.now_nanos()
    }

    /// Reserves `additional` bytes against the quota, failing `NoSpace`
    /// without mutating the counter if it would be exceeded.
    fn reserve(&self, additional: u64) -> KResult<()> {
        let Some(quota) = self.quota_bytes else {
            return Ok(());
        };
        let mut used = self.used_bytes.lock();
        if *used + additional > quota {
            return Err(KError::NoSpace);
        }
        *used += additional;
        Ok(())
    }

    fn release(&self, amount: u64) {
        let mut used = self.used_bytes.lock();
        *used = used.saturating_sub(amount);
    }
}

enum RamData {
    Regular(Vec<u8>),
    Directory(BTreeMap<String, Arc<dyn VNode>>),
    Symlink(String),
}

struct RamInodeState {
    vtype: InodeType,
    mode: Mode,
    uid: u32,
    gid: u32,
    atime: u64,
    mtime: u64,
    ctime: u64,
    nlink: u32,
    data: RamData,
}

/// One in-memory inode.
pub struct RamInode {
    id: InodeId,
    shared: Arc<RamFsShared>,
    state: RwLock<RamInodeState>,
}

impl RamInode {
    fn new_locked(shared: &Arc<RamFsShared>, vtype: InodeType, mode: Mode, uid: u32, gid: u32, nlink: u32, data: RamData) -> Arc<Self> {
        let now = shared.now();
        Arc::new(Self {
            id: shared.next_inode(),
            shared: shared.clone(),
            state: RwLock::new(RamInodeState {
                vtype,
                mode,
                uid,
                gid,
                atime: now,
                mtime: now,
                ctime: now,
                nlink,
                data,
            }),
        })
    }

    fn require_directory(&self) -> KResult<()> {
        if self.inode_type() != InodeType::Directory {
            return Err(KError::NotDirectory);
        }
        Ok(())
    }

    fn as_ram(target: &Arc<dyn VNode>) -> KResult<&RamInode> {
        target.as_any().downcast_ref::<RamInode>().ok_or(KError::InvalidArgument)
    }
}

fn move_entry(
    src: &mut RamInodeState,
    old_name: &str,
    dst: &mut RamInodeState,
    new_name: &str,
) -> KResult<()> {
    let RamData::Directory(src_children) = &mut src.data else {
        return Err(KError::NotDirectory);
    };
    let entry = src_children.remove(old_name).ok_or(KError::NotFound)?;
    let RamData::Directory(dst_children) = &mut dst.data else {
        return Err(KError::NotDirectory);
    };
    dst_children.insert(new_name.to_string(), entry);
    Ok(())
}

impl VNode for RamInode {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn inode_id(&self) -> InodeId {
        self.id
    }

    fn inode_type(&self) -> InodeType {
        self.state.read().vtype
    }

    fn stat(&self) -> KResult<FileStat> {
        let state = self.state.read();
        let size = match &state.data {
            RamData::Regular(bytes) => bytes.len() as u64,
            RamData::Directory(_) => 0,
            RamData::Symlink(target) => target.len() as u64,
        };
        Ok(FileStat {
            inode: self.id,
            vtype: state.vtype,
            mode: state.mode,
            uid: state.uid,
            gid: state.gid,
            size,
            atime_nanos: state.atime,
            mtime_nanos: state.mtime,
            ctime_nanos: state.ctime,
            nlink: state.nlink,
        })
    }

    fn setattr(&self, mode: Option<Mode>, uid: Option<u32>, gid: Option<u32>) -> KResult<()> {
        let mut state = self.state.write();
        if let Some(mode) = mode {
            state.mode = mode;
        }
        if let Some(uid) = uid {
            state.uid = uid;
        }
        if let Some(gid) = gid {
            state.gid = gid;
        }
        state.ctime = self.shared.now();
        Ok(())
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> KResult<usize> {
        let mut state = self.state.write();
        let RamData::Regular(bytes) = &state.data else {
            return Err(KError::IsDirectory);
        };
        let offset = offset as usize;
        if offset >= bytes.len() {
            return Ok(0);
        }
        let n = buf.len().min(bytes.len() - offset);
        buf[..n].copy_from_slice(&bytes[offset..offset + n]);
        state.atime = self.shared.now();
        Ok(n)
    }

    fn write(&self, offset: u64, buf: &[u8]) -> KResult<usize> {
        let mut state = self.state.write();
        let RamData::Regular(bytes) = &mut state.data else {
            return Err(KError::IsDirectory);
        };
        let offset = offset as usize;
        let end = offset + buf.len();
        if end > bytes.len() {
            self.shared.reserve((end - bytes.len()) as u64)?;
            bytes.resize(end, 0);
        }
        bytes[offset..end].copy_from_slice(buf);
        state.mtime = self.shared.now();
        Ok(buf.len())
    }

    fn truncate(&self, len: u64) -> KResult<()> {
        let mut state = self.state.write();
        let RamData::Regular(bytes) = &mut state.data else {
            return Err(KError::IsDirectory);
        };
        let len = len as usize;
        if len > bytes.len() {
            self.shared.reserve((len - bytes.len()) as u64)?;
        } else {
            self.shared.release((bytes.len() - len) as u64);
        }
        bytes.resize(len, 0);
        state.mtime = self.shared.now();
        Ok(())
    }

    fn lookup(&self, name: &str) -> KResult<Arc<dyn VNode>> {
        self.require_directory()?;
        let state = self.state.read();
        let RamData::Directory(children) = &state.data else {
            unreachable!("require_directory just checked vtype")
        };
        children.get(name).cloned().ok_or(KError::NotFound)
    }

    fn create(&self, name: &str, vtype: InodeType, mode: Mode) -> KResult<Arc<dyn VNode>> {
        self.require_directory()?;
        if matches!(vtype, InodeType::Directory) {
            return self.mkdir(name, mode);
        }
        let mut state = self.state.write();
        let RamData::Directory(children) = &mut state.data else {
            unreachable!("require_directory just checked vtype")
        };
        if children.contains_key(name) {
            return Err(KError::AlreadyExists);
        }
        let (uid, gid) = (state.uid, state.gid);
        let child = RamInode::new_locked(&self.shared, vtype, mode, uid, gid, 1, RamData::Regular(Vec::new()));
        children.insert(name.to_string(), child.clone());
        state.mtime = self.shared.now();
        Ok(child)
    }

    fn mkdir(&self, name: &str, mode: Mode) -> KResult<Arc<dyn VNode>> {
        self.require_directory()?;
        let mut state = self.state.write();
        let RamData::Directory(children) = &mut state.data else {
            unreachable!("require_directory just checked vtype")
        };
        if children.contains_key(name) {
            return Err(KError::AlreadyExists);
        }
        let (uid, gid) = (state.uid, state.gid);
        let child = RamInode::new_locked(&self.shared, InodeType::Directory, mode, uid, gid, 2, RamData::Directory(BTreeMap::new()));
        children.insert(name.to_string(), child.clone());
        state.nlink += 1;
        state.mtime = self.shared.now();
        Ok(child)
    }

    fn unlink(&self, name: &str) -> KResult<()> {
        self.require_directory()?;
        let mut state = self.state.write();
        let RamData::Directory(children) = &mut state.data else {
            unreachable!("require_directory just checked vtype")
        };
        let Some(target) = children.get(name) else {
            return Err(KError::NotFound);
        };
        if target.inode_type() == InodeType::Directory {
            return Err(KError::IsDirectory);
        }
        let target = children.remove(name).expect("just confirmed present");
        if let Some(ram) = target.as_any().downcast_ref::<RamInode>() {
            let mut target_state = ram.state.write();
            target_state.nlink = target_state.nlink.saturating_sub(1);
            if target_state.nlink == 0 {
                if let RamData::Regular(bytes) = &target_state.data {
                    self.shared.release(bytes.len() as u64);
                }
            }
        }
        state.mtime = self.shared.now();
        Ok(())
    }

    fn rmdir(&self, name: &str) -> KResult<()> {
        self.require_directory()?;
        let mut state = self.state.write();
        let RamData::Directory(children) = &mut state.data else {
            unreachable!("require_directory just checked vtype")
        };
        let Some(target) = children.get(name) else {
            return Err(KError::NotFound);
        };
        let ram = Self::as_ram(target)?;
        {
            let target_state = ram.state.read();
            let RamData::Directory(grandchildren) = &target_state.data else {
                return Err(KError::NotDirectory);
            };
            if !grandchildren.is_empty() {
                return Err(KError::NotEmpty);
            }
        }
        children.remove(name);
        state.nlink = state.nlink.saturating_sub(1);
        state.mtime = self.shared.now();
        Ok(())
    }

    fn symlink(&self, name: &str, target: &str) -> KResult<Arc<dyn VNode>> {
        self.require_directory()?;
        let mut state = self.state.write();
        let RamData::Directory(children) = &mut state.data else {
            unreachable!("require_directory just checked vtype")
        };
        if children.contains_key(name) {
            return Err(KError::AlreadyExists);
        }
        let (uid, gid) = (state.uid, state.gid);
        let link = RamInode::new_locked(
            &self.shared,
            InodeType::Symlink,
            Mode::from_octal(0o777),
            uid,
            gid,
            1,
            RamData::Symlink(target.to_string()),
        );
        children.insert(name.to_string(), link.clone());
        state.mtime = self.shared.now();
        Ok(link)
    }

    fn link(&self, name: &str, target: &Arc<dyn VNode>) -> KResult<()> {
        self.require_directory()?;
        let ram_target = Self::as_ram(target)?;
        if ram_target.inode_type() == InodeType::Directory {
            return Err(KError::PermissionDenied);
        }
        let mut state = self.state.write();
        let RamData::Directory(children) = &mut state.data else {
            unreachable!("require_directory just checked vtype")
        };
        if children.contains_key(name) {
            return Err(KError::AlreadyExists);
        }
        ram_target.state.write().nlink += 1;
        children.insert(name.to_string(), target.clone());
        state.mtime = self.shared.now();
        Ok(())
    }

    fn rename(&self, old_name: &str, new_dir: &Arc<dyn VNode>, new_name: &str) -> KResult<()> {
        self.require_directory()?;
        let new_ram_dir = Self::as_ram(new_dir)?;

        let self_ptr = std::ptr::addr_of!(*self) as usize;
        let other_ptr = std::ptr::addr_of!(*new_ram_dir) as usize;

        if self_ptr == other_ptr {
            let mut state = self.state.write();
            let RamData::Directory(children) = &mut state.data else {
                unreachable!("require_directory just checked vtype")
            };
            let entry = children.remove(old_name).ok_or(KError::NotFound)?;
            children.insert(new_name.to_string(), entry);
            state.mtime = self.shared.now();
            return Ok(());
        }

        // Lock in address order (mirrors the runqueue pair-locking
        // discipline of spec.md §5) so that a concurrent rename in the
        // opposite direction cannot deadlock against this one.
        if self_ptr < other_ptr {
            let mut a = self.state.write();
            let mut b = new_ram_dir.state.write();
            move_entry(&mut a, old_name, &mut b, new_name)
        } else {
            let mut b = new_ram_dir.state.write();
            let mut a = self.state.write();
            move_entry(&mut a, old_name, &mut b, new_name)
        }
    }

    fn readdir(&self) -> KResult<Vec<DirEntry>> {
        self.require_directory()?;
        let state = self.state.read();
        let RamData::Directory(children) = &state.data else {
            unreachable!("require_directory just checked vtype")
        };
        Ok(children
            .iter()
            .map(|(name, vnode)| DirEntry {
                name: name.clone(),
                inode: vnode.inode_id(),
                vtype: vnode.inode_type(),
            })
            .collect())
    }

    fn read_link(&self) -> KResult<String> {
        let state = self.state.read();
        let RamData::Symlink(target) = &state.data else {
            return Err(KError::InvalidArgument);
        };
        Ok(target.clone())
    }
}

/// The mandatory in-memory filesystem.
pub struct RamFs {
    shared: Arc<RamFsShared>,
    root: Arc<RamInode>,
    mounted_read_only: AtomicU32,
}

impl RamFs {
    /// Creates a fresh RamFS with an optional total-size quota in bytes.
    #[must_use]
    pub fn new(quota_bytes: Option<u64>) -> Self {
        let shared = Arc::new(RamFsShared {
            ids: IdGenerator::new(),
            clock: Clock::new(),
            quota_bytes,
            used_bytes: Mutex::new(0),
        });
        // World-writable, like a conventional tmpfs root, so a freshly
        // spawned unprivileged process (uid != 0, no FILE_W capability) can
        // still create entries directly under `/` per spec.md §8 S1.
        let root = RamInode::new_locked(
            &shared,
            InodeType::Directory,
            Mode::from_octal(0o777),
            0,
            0,
            2,
            RamData::Directory(BTreeMap::new()),
        );
        Self {
            shared,
            root,
            mounted_read_only: AtomicU32::new(0),
        }
    }

    /// Marks this mount read-only; mutating `VNode` operations still
    /// succeed at the vnode layer (enforcement happens at the dispatch
    /// facade via [`FileSystem::read_only`]).
    pub fn set_read_only(&self, read_only: bool) {
        self.mounted_read_only.store(u32::from(read_only), Ordering::Relaxed);
    }

    /// Bytes currently charged against this mount's quota.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        *self.shared.used_bytes.lock()
    }
}

impl FileSystem for RamFs {
    fn name(&self) -> &'static str {
        "ramfs"
    }

    fn root(&self) -> Arc<dyn VNode> {
        self.root.clone()
    }

    fn read_only(&self) -> bool {
        self.mounted_read_only.load(Ordering::Relaxed) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(fs: &RamFs) -> Arc<dyn VNode> {
        fs.root()
    }

    #[test]
    fn create_write_read_round_trip() {
        let fs = RamFs::new(None);
        let file = root(&fs).create("a.txt", InodeType::Regular, Mode::from_octal(0o644)).unwrap();
        assert_eq!(file.write(0, b"hello").unwrap(), 5);
        let mut buf = [0u8; 8];
        let n = file.read(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(file.stat().unwrap().size, 5);
    }

    #[test]
    fn unlink_then_reopen_fails_not_found() {
        let fs = RamFs::new(None);
        root(&fs).create("a.txt", InodeType::Regular, Mode::from_octal(0o644)).unwrap();
        root(&fs).unlink("a.txt").unwrap();
        assert_eq!(root(&fs).lookup("a.txt").unwrap_err(), KError::NotFound);
    }

    #[test]
    fn mkdir_then_rmdir_restores_prior_state() {
        let fs = RamFs::new(None);
        let before = root(&fs).stat().unwrap().nlink;
        root(&fs).mkdir("sub", Mode::from_octal(0o755)).unwrap();
        assert_eq!(root(&fs).stat().unwrap().nlink, before + 1);
        root(&fs).rmdir("sub").unwrap();
        assert_eq!(root(&fs).stat().unwrap().nlink, before);
        assert_eq!(root(&fs).lookup("sub").unwrap_err(), KError::NotFound);
    }

    #[test]
    fn rmdir_on_nonempty_directory_fails() {
        let fs = RamFs::new(None);
        let sub = root(&fs).mkdir("sub", Mode::from_octal(0o755)).unwrap();
        sub.create("inner.txt", InodeType::Regular, Mode::from_octal(0o644)).unwrap();
        assert_eq!(root(&fs).rmdir("sub").unwrap_err(), KError::NotEmpty);
    }

    #[test]
    fn write_past_quota_fails_no_space_and_leaves_size_unchanged() {
        let fs = RamFs::new(Some(4));
        let file = root(&fs).create("a.txt", InodeType::Regular, Mode::from_octal(0o644)).unwrap();
        assert_eq!(file.write(0, b"hello").unwrap_err(), KError::NoSpace);
        assert_eq!(file.stat().unwrap().size, 0);
    }

    #[test]
    fn rename_moves_entry_between_directories() {
        let fs = RamFs::new(None);
        let a = root(&fs).mkdir("a", Mode::from_octal(0o755)).unwrap();
        let b = root(&fs).mkdir("b", Mode::from_octal(0o755)).unwrap();
        a.create("f.txt", InodeType::Regular, Mode::from_octal(0o644)).unwrap();

        a.rename("f.txt", &b, "f.txt").unwrap();
        assert_eq!(a.lookup("f.txt").unwrap_err(), KError::NotFound);
        assert!(b.lookup("f.txt").is_ok());
    }

    #[test]
    fn symlink_round_trips_target() {
        let fs = RamFs::new(None);
        let link = root(&fs).symlink("l", "/a/b").unwrap();
        assert_eq!(link.read_link().unwrap(), "/a/b");
    }

    #[test]
    fn hardlink_shares_content_and_bumps_nlink() {
        let fs = RamFs::new(None);
        let file = root(&fs).create("a.txt", InodeType::Regular, Mode::from_octal(0o644)).unwrap();
        file.write(0, b"data").unwrap();
        root(&fs).link("b.txt", &file).unwrap();
        assert_eq!(file.stat().unwrap().nlink, 2);

        let via_b = root(&fs).lookup("b.txt").unwrap();
        let mut buf = [0u8; 4];
        via_b.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"data");
    }
}
