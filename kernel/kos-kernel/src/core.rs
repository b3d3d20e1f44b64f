//! The `Core` facade: owns one instance of every manager crate and exposes
//! the full syscall surface spec.md §6 lists, per spec.md §2's layering
//! (`kos-kernel` is the only crate allowed to depend on all the others).
//!
//! Every public method here follows the same shape: a thin `pub fn` that
//! records any error into [`kos_core::error::ErrorCounters`] and logs it,
//! wrapping a private `_inner` that does the actual work and can use `?`
//! freely. This mirrors the teacher's syscall-dispatch layer
//! (`kernel/hadron-kernel/src/syscall/dispatch.rs`), which centralizes
//! observability at the boundary rather than scattering `record()` calls
//! through each handler.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex as PlMutex, RwLock};

use kos_cap::{AuditEvent, CapFlags, IdentityStore, PermissionManager};
use kos_core::clock::{Clock, TimerWheel};
use kos_core::error::{ErrorCounters, KError, KResult};
use kos_core::id::{CpuId, Fd, IdGenerator, InodeId, Pid};
use kos_core::sync::WaitQueue;
use kos_fs::vnode::check_access;
use kos_fs::{Access as FsAccess, AccessContext, FileStat, FileSystem, InodeType, Mode, RamFs, Vfs};
use kos_ipc::{Frame, RequestChannel, SessionId, SessionTable};
use kos_mm::vm::Access as MmAccess;
use kos_mm::{AddressSpace, BuddyAllocator, MapFlags, Protection};
use kos_sched::{AffinityMask, SchedPolicy, Scheduler, TickOutcome};

use crate::config::CoreConfig;
use crate::fd::{OpenFile, OpenFlags, Whence};
use crate::pcb::{Pcb, PcbMutable, ProcState, ProcessTable};
use crate::persistence;
use crate::signal::{DefaultAction, Signal};

/// `exit` status synthesized for a process terminated by an uncaught
/// signal, matching the POSIX `128 + signum`-style convention loosely
/// (this simulation's signal set has no stable numbering, so every
/// signal-terminated process reports the same sentinel).
const SIGNAL_TERMINATED_STATUS: i32 = 128;

/// Owns every manager and dispatches the full KOS syscall surface.
///
/// One `Core` is the entire simulated machine: a process table, a
/// scheduler, an address-space pool, a VFS, a permission manager, an
/// identity store, and the IPC request-channel/session bookkeeping for
/// out-of-process callers. `kosctl` boots exactly one of these.
pub struct Core {
    config: CoreConfig,
    clock: Clock,
    timers: TimerWheel,
    pool: Arc<std::sync::Mutex<BuddyAllocator>>,
    cap: PermissionManager,
    vfs: RwLock<Vfs>,
    processes: ProcessTable,
    sched: Scheduler,
    channel: RequestChannel,
    sessions: SessionTable,
    identity: PlMutex<IdentityStore>,
    errors: ErrorCounters,
    next_cpu: AtomicUsize,
    pipe_ids: IdGenerator,
    identity_store_path: Option<PathBuf>,
    audit_log_path: Option<PathBuf>,
    audit_persisted: AtomicUsize,
}

impl Core {
    /// Boots a `Core`: allocates the shared frame pool, mounts a `RamFs` at
    /// `/`, and seeds a `root`/`user` RBAC role pair a fresh install can
    /// assign via `assign_role` without first calling `define_role`.
    ///
    /// # Errors
    /// Returns [`KError::InvalidArgument`] if `config.memory_frames` is not
    /// a power of two (see [`BuddyAllocator::new`]).
    pub fn new(config: CoreConfig) -> KResult<Self> {
        let pool = Arc::new(std::sync::Mutex::new(BuddyAllocator::new(config.memory_frames)?));
        let mut vfs = Vfs::new();
        let root_fs: Arc<dyn FileSystem> = Arc::new(RamFs::new(None));
        vfs.mount("/", root_fs);

        let cap = PermissionManager::with_audit_capacity(config.audit_capacity);
        cap.define_role("root", CapFlags::ROOT);
        cap.define_role("user", CapFlags::USR | CapFlags::FILE_R | CapFlags::FILE_W);

        let identity_store_path = config.identity_store_path.as_ref().map(PathBuf::from);
        let audit_log_path = config.audit_log_path.as_ref().map(PathBuf::from);
        let identity = match &identity_store_path {
            Some(path) => persistence::load_identity_store(path)?,
            None => IdentityStore::new(),
        };

        Ok(Self {
            sched: Scheduler::new(config.cpu_count),
            config,
            clock: Clock::new(),
            timers: TimerWheel::new(),
            pool,
            cap,
            vfs: RwLock::new(vfs),
            processes: ProcessTable::new(),
            channel: RequestChannel::new(),
            sessions: SessionTable::new(Clock::new()),
            identity: PlMutex::new(identity),
            errors: ErrorCounters::new(),
            next_cpu: AtomicUsize::new(0),
            pipe_ids: IdGenerator::new(),
            identity_store_path,
            audit_log_path,
            audit_persisted: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    #[must_use]
    pub fn error_counters(&self) -> &ErrorCounters {
        &self.errors
    }

    fn record<T>(&self, result: KResult<T>) -> KResult<T> {
        if let Err(err) = result {
            self.errors.record(err);
            tracing::debug!(target: "kos_kernel::core", kind = err.kind_name(), "syscall failed");
        }
        result
    }

    fn next_cpu(&self) -> CpuId {
        let n = self.next_cpu.fetch_add(1, Ordering::Relaxed);
        CpuId::new((n % self.sched.num_cpus()) as u32)
    }

    /// Builds an [`AccessContext`] for `access`, bypassing mode bits when
    /// the process holds `ROOT` (via [`Pcb::access_context`]) or the
    /// matching `FILE_R`/`FILE_W`/`FILE_X` capability, per spec.md §4.4's
    /// "capabilities bypass mode bits" note.
    fn access_context_for(&self, pcb: &Pcb, access: FsAccess) -> AccessContext {
        let mut ctx = pcb.access_context();
        if !ctx.bypass_permissions {
            let cap_flag = match access {
                FsAccess::Read => CapFlags::FILE_R,
                FsAccess::Write => CapFlags::FILE_W,
                FsAccess::Execute => CapFlags::FILE_X,
            };
            if self.cap.check(pcb.pid, cap_flag) {
                ctx.bypass_permissions = true;
            }
        }
        ctx
    }

    // ---- process lifecycle -------------------------------------------------

    /// Creates a new process. `parent = Pid::KERNEL` is the only parent
    /// permitted without already existing in the table (the implicit root
    /// of the process tree, per spec.md §4.9). `cpu = None` round-robins
    /// across the configured CPU count.
    ///
    /// # Errors
    /// [`KError::NotFound`] if `parent` is neither `Pid::KERNEL` nor a
    /// live process. [`KError::InvalidArgument`] if `policy`'s affinity
    /// would exclude the chosen residence (never happens with `cpu: None`).
    pub fn spawn(
        &self,
        parent: Pid,
        uid: u32,
        gid: u32,
        groups: Vec<u32>,
        policy: SchedPolicy,
        cpu: Option<CpuId>,
        caps: CapFlags,
    ) -> KResult<Pid> {
        self.record(self.spawn_inner(parent, uid, gid, groups, policy, cpu, caps))
    }

    fn spawn_inner(
        &self,
        parent: Pid,
        uid: u32,
        gid: u32,
        groups: Vec<u32>,
        policy: SchedPolicy,
        cpu: Option<CpuId>,
        caps: CapFlags,
    ) -> KResult<Pid> {
        let parent_pcb = self.processes.get(parent);
        if parent != Pid::KERNEL && parent_pcb.is_none() {
            return Err(KError::NotFound);
        }
        let cwd = parent_pcb.as_ref().map_or_else(|| "/".to_string(), |p| p.inner.lock().cwd.clone());

        let pid = self.processes.alloc_pid();
        let pcb = Pcb {
            pid,
            parent,
            uid,
            gid,
            groups,
            inner: parking_lot::Mutex::new(PcbMutable {
                state: ProcState::Runnable,
                fd_table: crate::fd::FdTable::new(),
                address_space: AddressSpace::new(self.pool.clone()),
                cwd,
                signal_mask: crate::signal::SignalSet::empty(),
                pending_signals: crate::signal::SignalSet::empty(),
                handlers: crate::signal::SignalSet::empty(),
                exit_status: None,
                children: Vec::new(),
            }),
            child_wait: WaitQueue::new(),
        };
        self.processes.insert(pcb);
        self.cap.register(pid, caps);

        let residence = cpu.unwrap_or_else(|| self.next_cpu());
        if let Err(err) = self.sched.spawn(pid, policy, AffinityMask::all(), residence) {
            self.cap.deregister(pid);
            return Err(err);
        }
        tracing::info!(pid = pid.as_u32(), parent = parent.as_u32(), "process spawned");
        Ok(pid)
    }

    /// Marks `pid` a zombie with `status`, per the RUNNING → ZOMBIE
    /// transition of spec.md §4.7.
    ///
    /// # Errors
    /// [`KError::NotFound`] if `pid` is unknown.
    pub fn exit(&self, pid: Pid, status: i32) -> KResult<()> {
        self.record(self.exit_inner(pid, status))
    }

    fn exit_inner(&self, pid: Pid, status: i32) -> KResult<()> {
        self.sched.remove(pid);
        self.cap.deregister(pid);
        self.processes.mark_zombie(pid, status)
    }

    /// Returns `pid` if it names a live process.
    ///
    /// # Errors
    /// [`KError::NotFound`] otherwise.
    pub fn getpid(&self, pid: Pid) -> KResult<Pid> {
        self.record(self.processes.get(pid).map(|_| pid).ok_or(KError::NotFound))
    }

    /// Reaps a zombie child of `parent`, blocking until one is available
    /// (or `timeout` elapses, if given). `target = None` reaps any child,
    /// matching the `pid = 0` convention SPEC_FULL.md documents.
    ///
    /// # Errors
    /// [`KError::NotFound`] if `parent` is unknown or has no child matching
    /// `target`. [`KError::Timeout`] if `timeout` elapses first.
    pub fn waitpid(&self, parent: Pid, target: Option<Pid>, timeout: Option<Duration>) -> KResult<(Pid, i32)> {
        self.record(self.waitpid_inner(parent, target, timeout))
    }

    fn waitpid_inner(&self, parent: Pid, target: Option<Pid>, timeout: Option<Duration>) -> KResult<(Pid, i32)> {
        let pcb = self.processes.get(parent).ok_or(KError::NotFound)?;
        loop {
            if let Some(want) = target {
                if self.processes.get(want).is_none() && !self.processes.children_of(parent).contains(&want) {
                    return Err(KError::NotFound);
                }
            }
            match self.processes.reap(parent, target) {
                Ok(result) => return Ok(result),
                Err(_) => {
                    let candidates = self.processes.children_of(parent);
                    let has_candidate = target.map_or(!candidates.is_empty(), |want| candidates.contains(&want));
                    if !has_candidate {
                        return Err(KError::NotFound);
                    }
                    let woken = match timeout {
                        Some(remaining) => pcb.child_wait.wait_timeout(remaining),
                        None => {
                            pcb.child_wait.wait();
                            true
                        }
                    };
                    if !woken {
                        return Err(KError::Timeout);
                    }
                }
            }
        }
    }

    // ---- signals ------------------------------------------------------------

    /// Raises `signal` against `target` and delivers it immediately (this
    /// simulation has no separate signal-delivery thread; delivery happens
    /// synchronously at `kill` time).
    ///
    /// # Errors
    /// [`KError::NotFound`] if `target` is unknown. [`KError::PermissionDenied`]
    /// if `sender != target` and `sender` lacks `PROC`.
    pub fn kill(&self, sender: Pid, target: Pid, signal: Signal) -> KResult<()> {
        self.record(self.kill_inner(sender, target, signal))
    }

    fn kill_inner(&self, sender: Pid, target: Pid, signal: Signal) -> KResult<()> {
        if sender != target && !self.cap.check(sender, CapFlags::PROC) {
            return Err(KError::PermissionDenied);
        }
        let pcb = self.processes.get(target).ok_or(KError::NotFound)?;
        pcb.inner.lock().pending_signals.raise(signal);
        self.deliver_pending(&pcb);
        Ok(())
    }

    /// Delivers the next deliverable pending signal, applying its default
    /// action unless the process has installed a handler via `sigaction`
    /// (in which case delivery is just recorded as consumed: this
    /// simulation has no userspace handler to actually invoke).
    fn deliver_pending(&self, pcb: &Arc<Pcb>) {
        let action = {
            let mut inner = pcb.inner.lock();
            let Some(sig) = inner.pending_signals.next_deliverable(inner.signal_mask) else {
                return;
            };
            inner.pending_signals.clear(sig);
            if !sig.is_uncatchable() && inner.handlers.is_pending(sig) {
                return;
            }
            sig.default_action()
        };
        match action {
            DefaultAction::Terminate => {
                self.sched.remove(pcb.pid);
                self.cap.deregister(pcb.pid);
                let _ = self.processes.mark_zombie(pcb.pid, SIGNAL_TERMINATED_STATUS);
            }
            DefaultAction::Stop => {
                pcb.inner.lock().state = ProcState::Stopped;
                self.sched.block(pcb.pid);
            }
            DefaultAction::Continue => {
                pcb.inner.lock().state = ProcState::Runnable;
                let _ = self.sched.wake(pcb.pid);
            }
            DefaultAction::Ignore => {}
        }
    }

    /// Installs or removes a custom handler for `signal`.
    ///
    /// # Errors
    /// [`KError::InvalidArgument`] for `SIGKILL`/`SIGSTOP`-equivalent
    /// signals, which cannot be caught. [`KError::NotFound`] if `pid` is
    /// unknown.
    pub fn sigaction(&self, pid: Pid, signal: Signal, catch: bool) -> KResult<()> {
        self.record(self.sigaction_inner(pid, signal, catch))
    }

    fn sigaction_inner(&self, pid: Pid, signal: Signal, catch: bool) -> KResult<()> {
        if signal.is_uncatchable() {
            return Err(KError::InvalidArgument);
        }
        let pcb = self.processes.get(pid).ok_or(KError::NotFound)?;
        let mut inner = pcb.inner.lock();
        if catch {
            inner.handlers.raise(signal);
        } else {
            inner.handlers.clear(signal);
        }
        Ok(())
    }

    // ---- filesystem -----------------------------------------------------------

    /// Opens `path`, creating it first if `flags` contains `CREAT` and it
    /// does not already exist.
    ///
    /// # Errors
    /// [`KError::NotFound`] if the path (or, without `CREAT`, its parent)
    /// is absent. [`KError::AlreadyExists`] for `CREAT | EXCL` against an
    /// existing path. [`KError::PermissionDenied`] if mode bits/capabilities
    /// deny the requested access. [`KError::NotDirectory`] if `DIRECTORY`
    /// was requested against a non-directory.
    pub fn open(&self, pid: Pid, path: &str, flags: OpenFlags, mode: Mode) -> KResult<Fd> {
        self.record(self.open_inner(pid, path, flags, mode))
    }

    fn open_inner(&self, pid: Pid, path: &str, flags: OpenFlags, mode: Mode) -> KResult<Fd> {
        let pcb = self.processes.get(pid).ok_or(KError::NotFound)?;
        let cwd = pcb.inner.lock().cwd.clone();
        let exec_ctx = self.access_context_for(&pcb, FsAccess::Execute);
        let vfs = self.vfs.read();

        let vnode = match vfs.resolve(path, &cwd, &exec_ctx) {
            Ok(found) => {
                if flags.contains(OpenFlags::CREAT) && flags.contains(OpenFlags::EXCL) {
                    return Err(KError::AlreadyExists);
                }
                found
            }
            Err(KError::NotFound) if flags.contains(OpenFlags::CREAT) => {
                let canonical = kos_fs::path::canonicalize(path, &cwd)?;
                let (parent_path, name) = kos_fs::path::split_parent(&canonical)?;
                let parent = vfs.resolve(&parent_path, "/", &exec_ctx)?;
                let write_ctx = self.access_context_for(&pcb, FsAccess::Write);
                let parent_stat = parent.stat()?;
                if !check_access(parent_stat.mode, parent_stat.uid, parent_stat.gid, &write_ctx, FsAccess::Write) {
                    return Err(KError::PermissionDenied);
                }
                let created = parent.create(&name, InodeType::Regular, mode)?;
                vfs.invalidate(parent.inode_id());
                created
            }
            Err(e) => return Err(e),
        };

        if flags.contains(OpenFlags::DIRECTORY) && vnode.inode_type() != InodeType::Directory {
            return Err(KError::NotDirectory);
        }

        let access = if flags.wants_write() { FsAccess::Write } else { FsAccess::Read };
        let rw_ctx = self.access_context_for(&pcb, access);
        let stat = vnode.stat()?;
        if !check_access(stat.mode, stat.uid, stat.gid, &rw_ctx, access) {
            return Err(KError::PermissionDenied);
        }
        if flags.contains(OpenFlags::TRUNC) && flags.wants_write() {
            vnode.truncate(0)?;
        }
        drop(vfs);

        let open_file = Arc::new(OpenFile::new(vnode, flags));
        Ok(pcb.inner.lock().fd_table.insert(open_file))
    }

    fn with_open_file<T>(&self, pid: Pid, fd: Fd, f: impl FnOnce(&OpenFile) -> KResult<T>) -> KResult<T> {
        let pcb = self.processes.get(pid).ok_or(KError::NotFound)?;
        let file = pcb.inner.lock().fd_table.get(fd).ok_or(KError::NotFound)?;
        f(&file)
    }

    /// # Errors
    /// [`KError::NotFound`] if `fd` is not open. [`KError::BadState`] if
    /// `fd` was not opened for reading.
    pub fn read(&self, pid: Pid, fd: Fd, buf: &mut [u8]) -> KResult<usize> {
        self.record(self.with_open_file(pid, fd, |f| f.read(buf)))
    }

    /// # Errors
    /// [`KError::NotFound`] if `fd` is not open. [`KError::BadState`] if
    /// `fd` was not opened for writing.
    pub fn write(&self, pid: Pid, fd: Fd, buf: &[u8]) -> KResult<usize> {
        self.record(self.with_open_file(pid, fd, |f| f.write(buf)))
    }

    /// # Errors
    /// [`KError::NotFound`] if `fd` is not open.
    pub fn lseek(&self, pid: Pid, fd: Fd, offset: i64, whence: Whence) -> KResult<u64> {
        self.record(self.with_open_file(pid, fd, |f| f.seek(offset, whence)))
    }

    /// # Errors
    /// [`KError::NotFound`] if `pid` is unknown or `fd` is not open.
    pub fn close(&self, pid: Pid, fd: Fd) -> KResult<()> {
        self.record(self.close_inner(pid, fd))
    }

    fn close_inner(&self, pid: Pid, fd: Fd) -> KResult<()> {
        let pcb = self.processes.get(pid).ok_or(KError::NotFound)?;
        pcb.inner.lock().fd_table.close(fd)
    }

    /// # Errors
    /// [`KError::NotFound`] if `pid` is unknown or `oldfd` is not open.
    pub fn dup(&self, pid: Pid, oldfd: Fd) -> KResult<Fd> {
        self.record(self.dup_inner(pid, oldfd))
    }

    fn dup_inner(&self, pid: Pid, oldfd: Fd) -> KResult<Fd> {
        let pcb = self.processes.get(pid).ok_or(KError::NotFound)?;
        pcb.inner.lock().fd_table.dup(oldfd)
    }

    /// # Errors
    /// [`KError::NotFound`] if `pid` is unknown or `oldfd` is not open.
    pub fn dup2(&self, pid: Pid, oldfd: Fd, newfd: Fd) -> KResult<()> {
        self.record(self.dup2_inner(pid, oldfd, newfd))
    }

    fn dup2_inner(&self, pid: Pid, oldfd: Fd, newfd: Fd) -> KResult<()> {
        let pcb = self.processes.get(pid).ok_or(KError::NotFound)?;
        pcb.inner.lock().fd_table.dup2(oldfd, newfd)
    }

    /// Creates a pipe, returning `(read_fd, write_fd)`.
    ///
    /// # Errors
    /// [`KError::NotFound`] if `pid` is unknown.
    pub fn pipe(&self, pid: Pid) -> KResult<(Fd, Fd)> {
        self.record(self.pipe_inner(pid))
    }

    fn pipe_inner(&self, pid: Pid) -> KResult<(Fd, Fd)> {
        let pcb = self.processes.get(pid).ok_or(KError::NotFound)?;
        let id = InodeId::new(self.pipe_ids.next());
        let (read_end, write_end) = kos_ipc::pipe(id, kos_ipc::DEFAULT_PIPE_CAPACITY);
        let mut inner = pcb.inner.lock();
        let rfd = inner.fd_table.insert(Arc::new(OpenFile::new(read_end, OpenFlags::RDONLY)));
        let wfd = inner.fd_table.insert(Arc::new(OpenFile::new(write_end, OpenFlags::WRONLY)));
        Ok((rfd, wfd))
    }

    /// # Errors
    /// [`KError::NotFound`] if `pid` or the path is absent.
    pub fn stat(&self, pid: Pid, path: &str) -> KResult<FileStat> {
        self.record(self.stat_inner(pid, path))
    }

    fn stat_inner(&self, pid: Pid, path: &str) -> KResult<FileStat> {
        let pcb = self.processes.get(pid).ok_or(KError::NotFound)?;
        let cwd = pcb.inner.lock().cwd.clone();
        let ctx = self.access_context_for(&pcb, FsAccess::Execute);
        self.vfs.read().resolve(path, &cwd, &ctx)?.stat()
    }

    /// # Errors
    /// [`KError::NotFound`] if the parent directory is absent.
    /// [`KError::AlreadyExists`] if `path` already exists.
    /// [`KError::PermissionDenied`] if the parent denies write access.
    pub fn mkdir(&self, pid: Pid, path: &str, mode: Mode) -> KResult<()> {
        self.record(self.mkdir_inner(pid, path, mode))
    }

    fn mkdir_inner(&self, pid: Pid, path: &str, mode: Mode) -> KResult<()> {
        let pcb = self.processes.get(pid).ok_or(KError::NotFound)?;
        let cwd = pcb.inner.lock().cwd.clone();
        let exec_ctx = self.access_context_for(&pcb, FsAccess::Execute);
        let canonical = kos_fs::path::canonicalize(path, &cwd)?;
        let (parent_path, name) = kos_fs::path::split_parent(&canonical)?;
        let vfs = self.vfs.read();
        let parent = vfs.resolve(&parent_path, "/", &exec_ctx)?;
        self.require_write(&pcb, &parent)?;
        parent.mkdir(&name, mode)?;
        vfs.invalidate(parent.inode_id());
        Ok(())
    }

    fn require_write(&self, pcb: &Pcb, vnode: &Arc<dyn kos_fs::VNode>) -> KResult<()> {
        let ctx = self.access_context_for(pcb, FsAccess::Write);
        let stat = vnode.stat()?;
        if check_access(stat.mode, stat.uid, stat.gid, &ctx, FsAccess::Write) {
            Ok(())
        } else {
            Err(KError::PermissionDenied)
        }
    }

    /// # Errors
    /// [`KError::NotFound`] if `path` is absent. [`KError::PermissionDenied`]
    /// if the parent denies write access.
    pub fn unlink(&self, pid: Pid, path: &str) -> KResult<()> {
        self.record(self.unlink_inner(pid, path))
    }

    fn unlink_inner(&self, pid: Pid, path: &str) -> KResult<()> {
        let pcb = self.processes.get(pid).ok_or(KError::NotFound)?;
        let cwd = pcb.inner.lock().cwd.clone();
        let exec_ctx = self.access_context_for(&pcb, FsAccess::Execute);
        let canonical = kos_fs::path::canonicalize(path, &cwd)?;
        let (parent_path, name) = kos_fs::path::split_parent(&canonical)?;
        let vfs = self.vfs.read();
        let parent = vfs.resolve(&parent_path, "/", &exec_ctx)?;
        self.require_write(&pcb, &parent)?;
        parent.unlink(&name)?;
        vfs.invalidate(parent.inode_id());
        Ok(())
    }

    /// # Errors
    /// [`KError::NotFound`] if `path` is absent. [`KError::NotEmpty`] if
    /// non-empty. [`KError::PermissionDenied`] if the parent denies write
    /// access.
    pub fn rmdir(&self, pid: Pid, path: &str) -> KResult<()> {
        self.record(self.rmdir_inner(pid, path))
    }

    fn rmdir_inner(&self, pid: Pid, path: &str) -> KResult<()> {
        let pcb = self.processes.get(pid).ok_or(KError::NotFound)?;
        let cwd = pcb.inner.lock().cwd.clone();
        let exec_ctx = self.access_context_for(&pcb, FsAccess::Execute);
        let canonical = kos_fs::path::canonicalize(path, &cwd)?;
        let (parent_path, name) = kos_fs::path::split_parent(&canonical)?;
        let vfs = self.vfs.read();
        let parent = vfs.resolve(&parent_path, "/", &exec_ctx)?;
        self.require_write(&pcb, &parent)?;
        parent.rmdir(&name)?;
        vfs.invalidate(parent.inode_id());
        Ok(())
    }

    /// # Errors
    /// [`KError::NotFound`] if either path's parent or `old_path` is
    /// absent. [`KError::PermissionDenied`] if either parent denies write
    /// access.
    pub fn rename(&self, pid: Pid, old_path: &str, new_path: &str) -> KResult<()> {
        self.record(self.rename_inner(pid, old_path, new_path))
    }

    fn rename_inner(&self, pid: Pid, old_path: &str, new_path: &str) -> KResult<()> {
        let pcb = self.processes.get(pid).ok_or(KError::NotFound)?;
        let cwd = pcb.inner.lock().cwd.clone();
        let exec_ctx = self.access_context_for(&pcb, FsAccess::Execute);
        let old_canonical = kos_fs::path::canonicalize(old_path, &cwd)?;
        let new_canonical = kos_fs::path::canonicalize(new_path, &cwd)?;
        let (old_parent_path, old_name) = kos_fs::path::split_parent(&old_canonical)?;
        let (new_parent_path, new_name) = kos_fs::path::split_parent(&new_canonical)?;
        let vfs = self.vfs.read();
        let old_parent = vfs.resolve(&old_parent_path, "/", &exec_ctx)?;
        let new_parent = vfs.resolve(&new_parent_path, "/", &exec_ctx)?;
        self.require_write(&pcb, &old_parent)?;
        self.require_write(&pcb, &new_parent)?;
        old_parent.rename(&old_name, &new_parent, &new_name)?;
        vfs.invalidate(old_parent.inode_id());
        vfs.invalidate(new_parent.inode_id());
        Ok(())
    }

    /// # Errors
    /// [`KError::NotFound`] if `path` is absent. [`KError::PermissionDenied`]
    /// if the caller is neither the owner nor holds `CFG`/root.
    pub fn chmod(&self, pid: Pid, path: &str, mode: Mode) -> KResult<()> {
        self.record(self.chmod_inner(pid, path, mode))
    }

    fn chmod_inner(&self, pid: Pid, path: &str, mode: Mode) -> KResult<()> {
        let pcb = self.processes.get(pid).ok_or(KError::NotFound)?;
        let cwd = pcb.inner.lock().cwd.clone();
        let ctx = self.access_context_for(&pcb, FsAccess::Execute);
        let vnode = self.vfs.read().resolve(path, &cwd, &ctx)?;
        let stat = vnode.stat()?;
        let owner_or_privileged = stat.uid == pcb.uid || ctx.bypass_permissions || self.cap.check(pid, CapFlags::CFG);
        if !owner_or_privileged {
            return Err(KError::PermissionDenied);
        }
        vnode.setattr(Some(mode), None, None)
    }

    /// Changes ownership; requires `ROOT` or `AM`, matching the identity
    /// subsystem's "account/identity management" flag scope.
    ///
    /// # Errors
    /// [`KError::PermissionDenied`] if `pid` lacks both. [`KError::NotFound`]
    /// if `path` is absent.
    pub fn chown(&self, pid: Pid, path: &str, uid: u32, gid: u32) -> KResult<()> {
        self.record(self.chown_inner(pid, path, uid, gid))
    }

    fn chown_inner(&self, pid: Pid, path: &str, uid: u32, gid: u32) -> KResult<()> {
        if !self.cap.check(pid, CapFlags::ROOT) && !self.cap.check(pid, CapFlags::AM) {
            return Err(KError::PermissionDenied);
        }
        let pcb = self.processes.get(pid).ok_or(KError::NotFound)?;
        let cwd = pcb.inner.lock().cwd.clone();
        let ctx = self.access_context_for(&pcb, FsAccess::Execute);
        let vnode = self.vfs.read().resolve(path, &cwd, &ctx)?;
        vnode.setattr(None, Some(uid), Some(gid))
    }

    /// # Errors
    /// [`KError::NotFound`] if the parent directory of `link_path` is
    /// absent. [`KError::AlreadyExists`] if `link_path` is already taken.
    pub fn symlink(&self, pid: Pid, target: &str, link_path: &str) -> KResult<()> {
        self.record(self.symlink_inner(pid, target, link_path))
    }

    fn symlink_inner(&self, pid: Pid, target: &str, link_path: &str) -> KResult<()> {
        let pcb = self.processes.get(pid).ok_or(KError::NotFound)?;
        let cwd = pcb.inner.lock().cwd.clone();
        let exec_ctx = self.access_context_for(&pcb, FsAccess::Execute);
        let canonical = kos_fs::path::canonicalize(link_path, &cwd)?;
        let (parent_path, name) = kos_fs::path::split_parent(&canonical)?;
        let vfs = self.vfs.read();
        let parent = vfs.resolve(&parent_path, "/", &exec_ctx)?;
        self.require_write(&pcb, &parent)?;
        parent.symlink(&name, target)?;
        vfs.invalidate(parent.inode_id());
        Ok(())
    }

    /// # Errors
    /// [`KError::NotFound`] if `target_path` or `link_path`'s parent is
    /// absent.
    pub fn link(&self, pid: Pid, target_path: &str, link_path: &str) -> KResult<()> {
        self.record(self.link_inner(pid, target_path, link_path))
    }

    fn link_inner(&self, pid: Pid, target_path: &str, link_path: &str) -> KResult<()> {
        let pcb = self.processes.get(pid).ok_or(KError::NotFound)?;
        let cwd = pcb.inner.lock().cwd.clone();
        let exec_ctx = self.access_context_for(&pcb, FsAccess::Execute);
        let vfs = self.vfs.read();
        let target = vfs.resolve(target_path, &cwd, &exec_ctx)?;
        let canonical = kos_fs::path::canonicalize(link_path, &cwd)?;
        let (parent_path, name) = kos_fs::path::split_parent(&canonical)?;
        let parent = vfs.resolve(&parent_path, "/", &exec_ctx)?;
        self.require_write(&pcb, &parent)?;
        parent.link(&name, &target)?;
        vfs.invalidate(parent.inode_id());
        Ok(())
    }

    /// Changes `pid`'s current working directory, resolving and requiring
    /// it to exist and be a directory first.
    ///
    /// # Errors
    /// [`KError::NotFound`] if `path` is absent. [`KError::NotDirectory`]
    /// if it is not a directory.
    pub fn chdir(&self, pid: Pid, path: &str) -> KResult<()> {
        self.record(self.chdir_inner(pid, path))
    }

    fn chdir_inner(&self, pid: Pid, path: &str) -> KResult<()> {
        let pcb = self.processes.get(pid).ok_or(KError::NotFound)?;
        let cwd = pcb.inner.lock().cwd.clone();
        let ctx = self.access_context_for(&pcb, FsAccess::Execute);
        let canonical = kos_fs::path::canonicalize(path, &cwd)?;
        let vnode = self.vfs.read().resolve(&canonical, "/", &ctx)?;
        if vnode.inode_type() != InodeType::Directory {
            return Err(KError::NotDirectory);
        }
        pcb.inner.lock().cwd = canonical;
        Ok(())
    }

    // ---- memory ---------------------------------------------------------------

    /// # Errors
    /// [`KError::NotFound`] if `pid` is unknown. See
    /// [`AddressSpace::mmap`] for the rest.
    pub fn mmap(&self, pid: Pid, addr_hint: usize, len: usize, prot: Protection, flags: MapFlags) -> KResult<usize> {
        self.record(self.mmap_inner(pid, addr_hint, len, prot, flags))
    }

    fn mmap_inner(&self, pid: Pid, addr_hint: usize, len: usize, prot: Protection, flags: MapFlags) -> KResult<usize> {
        let pcb = self.processes.get(pid).ok_or(KError::NotFound)?;
        pcb.inner.lock().address_space.mmap(addr_hint, len, prot, flags, None)
    }

    /// # Errors
    /// [`KError::NotFound`] if `pid` is unknown. See
    /// [`AddressSpace::munmap`] for the rest.
    pub fn munmap(&self, pid: Pid, addr: usize, len: usize) -> KResult<()> {
        self.record(self.munmap_inner(pid, addr, len))
    }

    fn munmap_inner(&self, pid: Pid, addr: usize, len: usize) -> KResult<()> {
        let pcb = self.processes.get(pid).ok_or(KError::NotFound)?;
        pcb.inner.lock().address_space.munmap(addr, len)
    }

    /// # Errors
    /// [`KError::NotFound`] if `pid` is unknown. See
    /// [`AddressSpace::mprotect`] for the rest.
    pub fn mprotect(&self, pid: Pid, addr: usize, len: usize, prot: Protection) -> KResult<()> {
        self.record(self.mprotect_inner(pid, addr, len, prot))
    }

    fn mprotect_inner(&self, pid: Pid, addr: usize, len: usize, prot: Protection) -> KResult<()> {
        let pcb = self.processes.get(pid).ok_or(KError::NotFound)?;
        pcb.inner.lock().address_space.mprotect(addr, len, prot)
    }

    /// Services a page fault for `pid` at `addr`, e.g. from a simulated
    /// trap handler driving the worker-thread loop.
    ///
    /// # Errors
    /// [`KError::NotFound`] if `pid` is unknown. See
    /// [`AddressSpace::page_fault`] for the rest.
    pub fn page_fault(&self, pid: Pid, addr: usize, access: MmAccess) -> KResult<()> {
        self.record(self.page_fault_inner(pid, addr, access))
    }

    fn page_fault_inner(&self, pid: Pid, addr: usize, access: MmAccess) -> KResult<()> {
        let pcb = self.processes.get(pid).ok_or(KError::NotFound)?;
        pcb.inner.lock().address_space.page_fault(addr, access)
    }

    // ---- scheduling -------------------------------------------------------------

    #[must_use]
    pub fn num_cpus(&self) -> usize {
        self.sched.num_cpus()
    }

    /// Advances `cpu`'s running task's accounting by `delta_nanos`.
    pub fn tick(&self, cpu: CpuId, delta_nanos: u64) -> TickOutcome {
        self.sched.tick(cpu, delta_nanos)
    }

    #[must_use]
    pub fn pick_next(&self, cpu: CpuId) -> Option<Pid> {
        self.sched.pick_next(cpu)
    }

    pub fn requeue(&self, cpu: CpuId, pid: Pid) {
        self.sched.requeue(cpu, pid);
    }

    /// Rebinds `pid`'s scheduling policy, preserving its current CPU
    /// residence and affinity mask. Built atop `Scheduler::remove` +
    /// `Scheduler::spawn` rather than a dedicated setparam primitive,
    /// since the scheduler crate has no notion of "the calling process's
    /// identity", only scheduling entities.
    ///
    /// # Errors
    /// [`KError::NotFound`] if `pid` is not currently scheduled.
    pub fn sched_setparam(&self, pid: Pid, policy: SchedPolicy) -> KResult<()> {
        self.record(self.sched_setparam_inner(pid, policy))
    }

    fn sched_setparam_inner(&self, pid: Pid, policy: SchedPolicy) -> KResult<()> {
        let entity = self.sched.entity(pid).ok_or(KError::NotFound)?;
        self.sched.remove(pid);
        self.sched.spawn(pid, policy, entity.affinity, entity.residence)
    }

    // ---- capabilities -----------------------------------------------------------

    /// Checks `pid` against `flag`, first revoking any elevation that has
    /// just lapsed so the audit log records `ElevationExpired` promptly
    /// rather than only on the next explicit sweep.
    #[must_use]
    pub fn check_permission(&self, pid: Pid, flag: CapFlags) -> bool {
        self.cap.expire_if_due(pid, Instant::now());
        self.cap.check(pid, flag)
    }

    pub fn elevate(&self, requester: Pid, target: Pid, flags: CapFlags, duration: Duration) -> bool {
        self.cap.elevate(requester, target, flags, duration)
    }

    pub fn drop_capability_flags(&self, requester: Pid, pid: Pid, flags: CapFlags) -> bool {
        self.cap.drop_flags(requester, pid, flags)
    }

    pub fn assign_role(&self, requester: Pid, pid: Pid, role: &str) -> bool {
        self.cap.assign_role(requester, pid, role)
    }

    pub fn define_role(&self, role: impl Into<String>, flags: CapFlags) {
        self.cap.define_role(role, flags);
    }

    #[must_use]
    pub fn audit_log(&self) -> Vec<AuditEvent> {
        self.cap.audit_log()
    }

    // ---- identity and sessions ----------------------------------------------------

    /// Adds a user to the identity store; requires `AM`.
    ///
    /// # Errors
    /// [`KError::PermissionDenied`] if `requester` lacks `AM`.
    /// [`KError::AlreadyExists`] if `username` is taken.
    pub fn add_user(&self, requester: Pid, username: &str, password: &str) -> KResult<()> {
        self.record(self.add_user_inner(requester, username, password))
    }

    fn add_user_inner(&self, requester: Pid, username: &str, password: &str) -> KResult<()> {
        if !self.cap.check(requester, CapFlags::AM) {
            return Err(KError::PermissionDenied);
        }
        let mut store = self.identity.lock();
        store.add_user(username, password)?;
        self.persist_identity_store(&store)
    }

    /// # Errors
    /// [`KError::PermissionDenied`] if `requester` lacks `AM`.
    /// [`KError::NotFound`] if `username` is unknown.
    pub fn change_password(&self, requester: Pid, username: &str, new_password: &str) -> KResult<()> {
        self.record(self.change_password_inner(requester, username, new_password))
    }

    fn change_password_inner(&self, requester: Pid, username: &str, new_password: &str) -> KResult<()> {
        if !self.cap.check(requester, CapFlags::AM) {
            return Err(KError::PermissionDenied);
        }
        let mut store = self.identity.lock();
        store.change_password(username, new_password)?;
        self.persist_identity_store(&store)
    }

    /// Writes the identity store to disk if `identity_store_path` is
    /// configured; a no-op otherwise, so an in-memory-only `Core` never
    /// touches the host filesystem.
    fn persist_identity_store(&self, store: &IdentityStore) -> KResult<()> {
        match &self.identity_store_path {
            Some(path) => persistence::save_identity_store(path, store),
            None => Ok(()),
        }
    }

    /// Verifies `username`/`password` against the identity store and, on
    /// success, mints a session. A single-process simulation has no real
    /// wire transport to drive the `Challenge`/`AuthRequest` handshake
    /// `kos-ipc` exposes for out-of-process callers, so this is the
    /// in-process equivalent: same credential check, same session mint.
    ///
    /// # Errors
    /// [`KError::NotFound`] if `username` is unknown.
    /// [`KError::PermissionDenied`] if `password` is wrong.
    pub fn authenticate(&self, username: &str, password: &str) -> KResult<SessionId> {
        self.record(self.authenticate_inner(username, password))
    }

    fn authenticate_inner(&self, username: &str, password: &str) -> KResult<SessionId> {
        if !self.identity.lock().authenticate(username, password)? {
            return Err(KError::PermissionDenied);
        }
        Ok(self.sessions.create("user", username))
    }

    /// # Errors
    /// [`KError::NotFound`]/[`KError::Timeout`]: see [`SessionTable::heartbeat`].
    pub fn heartbeat(&self, session: SessionId) -> KResult<()> {
        self.record(self.sessions.heartbeat(session))
    }

    /// # Errors
    /// See [`SessionTable::validate`].
    pub fn validate_session(&self, session: SessionId) -> KResult<()> {
        self.record(self.sessions.validate(session))
    }

    pub fn terminate_session(&self, session: SessionId) {
        self.sessions.terminate(session);
    }

    // ---- IPC request channel -----------------------------------------------------

    #[must_use]
    pub fn ipc_begin_request(&self) -> u64 {
        self.channel.begin_request()
    }

    /// # Errors
    /// [`KError::Timeout`]/[`KError::NotFound`]: see
    /// [`RequestChannel::wait_response`].
    pub fn ipc_wait_response(&self, correlation_id: u64, timeout: Duration) -> KResult<Frame> {
        self.record(self.channel.wait_response(correlation_id, timeout))
    }

    pub fn ipc_complete(&self, correlation_id: u64, frame: Frame) {
        self.channel.complete(correlation_id, frame);
    }

    pub fn ipc_cancel(&self, correlation_id: u64) {
        self.channel.cancel(correlation_id);
    }

    // ---- housekeeping -------------------------------------------------------------

    /// Periodic maintenance: fires due timers, sweeps expired IPC sessions,
    /// and flushes any audit events recorded since the last call. Meant to
    /// be called once per simulated tick by whichever worker thread owns
    /// housekeeping duty, not per-CPU.
    pub fn housekeeping(&self) {
        self.timers.fire_due(self.clock.now());
        self.sessions.sweep_expired();
        self.flush_audit_log();
    }

    /// Appends every audit event recorded since the last flush to
    /// `audit_log_path`, if configured. A no-op otherwise. Events already
    /// on disk are never rewritten, matching the audit log's append-only
    /// contract.
    fn flush_audit_log(&self) {
        let Some(path) = &self.audit_log_path else { return };
        let snapshot = self.cap.audit_log();
        let persisted = self.audit_persisted.load(Ordering::Relaxed);
        if persisted >= snapshot.len() {
            return;
        }
        if persistence::append_audit_log(path, &snapshot[persisted..]).is_ok() {
            self.audit_persisted.store(snapshot.len(), Ordering::Relaxed);
        }
    }

    /// Flushes the identity store and any unpersisted audit events one
    /// last time. Callers that configured `identity_store_path`/
    /// `audit_log_path` should call this before dropping the `Core`; a
    /// `Core` with neither path configured has nothing to do here.
    pub fn shutdown(&self) {
        if self.identity_store_path.is_some() {
            let store = self.identity.lock();
            let _ = self.persist_identity_store(&store);
        }
        self.flush_audit_log();
    }

    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kos_fs::Mode;

    fn core() -> Core {
        Core::new(CoreConfig::default()).unwrap()
    }

    fn root_pid(core: &Core) -> Pid {
        core.spawn(Pid::KERNEL, 0, 0, Vec::new(), SchedPolicy::Cfs { nice: 0 }, None, CapFlags::ROOT)
            .unwrap()
    }

    #[test]
    fn spawn_waitpid_round_trip_reports_exit_status() {
        let core = core();
        let parent = root_pid(&core);
        let child = core
            .spawn(parent, 1000, 1000, Vec::new(), SchedPolicy::Cfs { nice: 0 }, None, CapFlags::USR)
            .unwrap();
        core.exit(child, 42).unwrap();
        let (reaped, status) = core.waitpid(parent, Some(child), None).unwrap();
        assert_eq!(reaped, child);
        assert_eq!(status, 42);
    }

    #[test]
    fn waitpid_on_childless_parent_is_not_found() {
        let core = core();
        let parent = root_pid(&core);
        assert_eq!(core.waitpid(parent, None, Some(Duration::from_millis(10))).unwrap_err(), KError::NotFound);
    }

    #[test]
    fn open_create_write_read_round_trips_scenario_s1() {
        let core = core();
        let pid = root_pid(&core);
        let fd = core
            .open(pid, "/greeting.txt", OpenFlags::RDWR | OpenFlags::CREAT, Mode::from_octal(0o644))
            .unwrap();
        core.write(pid, fd, b"hello kos").unwrap();
        core.lseek(pid, fd, 0, Whence::Set).unwrap();
        let mut buf = [0u8; 16];
        let n = core.read(pid, fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello kos");
    }

    #[test]
    fn open_without_creat_on_missing_path_is_not_found() {
        let core = core();
        let pid = root_pid(&core);
        let err = core.open(pid, "/nope.txt", OpenFlags::RDONLY, Mode::empty()).unwrap_err();
        assert_eq!(err, KError::NotFound);
    }

    #[test]
    fn unprivileged_process_cannot_open_anothers_private_file() {
        let core = core();
        let root = root_pid(&core);
        core.open(root, "/secret.txt", OpenFlags::RDWR | OpenFlags::CREAT, Mode::from_octal(0o600)).unwrap();
        let other = core
            .spawn(root, 1001, 1001, Vec::new(), SchedPolicy::Cfs { nice: 0 }, None, CapFlags::USR)
            .unwrap();
        let err = core.open(other, "/secret.txt", OpenFlags::RDONLY, Mode::empty()).unwrap_err();
        assert_eq!(err, KError::PermissionDenied);
    }

    #[test]
    fn kill_with_uncaught_term_zombifies_target() {
        let core = core();
        let root = root_pid(&core);
        let child = core
            .spawn(root, 1000, 1000, Vec::new(), SchedPolicy::Cfs { nice: 0 }, None, CapFlags::USR)
            .unwrap();
        core.kill(root, child, Signal::Term).unwrap();
        let (reaped, status) = core.waitpid(root, Some(child), None).unwrap();
        assert_eq!(reaped, child);
        assert_eq!(status, SIGNAL_TERMINATED_STATUS);
    }

    #[test]
    fn sigaction_suppresses_default_termination() {
        let core = core();
        let root = root_pid(&core);
        let child = core
            .spawn(root, 1000, 1000, Vec::new(), SchedPolicy::Cfs { nice: 0 }, None, CapFlags::USR)
            .unwrap();
        core.sigaction(child, Signal::Usr1, true).unwrap();
        core.kill(root, child, Signal::Usr1).unwrap();
        assert_eq!(core.waitpid(root, Some(child), Some(Duration::from_millis(10))).unwrap_err(), KError::Timeout);
    }

    #[test]
    fn sigkill_is_always_uncatchable() {
        let core = core();
        let pid = root_pid(&core);
        assert_eq!(core.sigaction(pid, Signal::Kill, true).unwrap_err(), KError::InvalidArgument);
    }

    #[test]
    fn pipe_write_then_read_round_trips() {
        let core = core();
        let pid = root_pid(&core);
        let (rfd, wfd) = core.pipe(pid).unwrap();
        core.write(pid, wfd, b"ping").unwrap();
        let mut buf = [0u8; 4];
        let n = core.read(pid, rfd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn elevate_then_check_then_expire_scenario_s6() {
        let core = core();
        let root = root_pid(&core);
        let user = core
            .spawn(root, 1000, 1000, Vec::new(), SchedPolicy::Cfs { nice: 0 }, None, CapFlags::USR)
            .unwrap();
        assert!(!core.check_permission(user, CapFlags::NET));
        assert!(core.elevate(root, user, CapFlags::NET, Duration::from_millis(10)));
        assert!(core.check_permission(user, CapFlags::NET));
        std::thread::sleep(Duration::from_millis(15));
        assert!(!core.check_permission(user, CapFlags::NET));
    }

    #[test]
    fn authenticate_unknown_user_is_not_found() {
        let core = core();
        assert_eq!(core.authenticate("ghost", "pw").unwrap_err(), KError::NotFound);
    }

    #[test]
    fn mkdir_then_rename_then_stat_finds_file_at_new_path() {
        let core = core();
        let pid = root_pid(&core);
        core.mkdir(pid, "/a", Mode::from_octal(0o755)).unwrap();
        core.open(pid, "/a/f.txt", OpenFlags::RDWR | OpenFlags::CREAT, Mode::from_octal(0o644)).unwrap();
        core.rename(pid, "/a/f.txt", "/a/g.txt").unwrap();
        assert!(core.stat(pid, "/a/g.txt").is_ok());
        assert_eq!(core.stat(pid, "/a/f.txt").unwrap_err(), KError::NotFound);
    }

    #[test]
    fn added_user_survives_a_restart_when_a_shadow_path_is_configured() {
        let path = std::env::temp_dir().join(format!("kos-core-shadow-test-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let mut config = CoreConfig::default();
        config.identity_store_path = Some(path.to_string_lossy().into_owned());
        let first = Core::new(config.clone()).unwrap();
        let root = root_pid(&first);
        first.add_user(root, "alice", "hunter2").unwrap();

        let second = Core::new(config).unwrap();
        assert!(second.authenticate("alice", "hunter2").is_ok());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn housekeeping_flushes_audit_events_when_a_log_path_is_configured() {
        let path = std::env::temp_dir().join(format!("kos-core-audit-test-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let mut config = CoreConfig::default();
        config.audit_log_path = Some(path.to_string_lossy().into_owned());
        let core = Core::new(config).unwrap();
        let root = root_pid(&core);
        let user = core
            .spawn(root, 1000, 1000, Vec::new(), SchedPolicy::Cfs { nice: 0 }, None, CapFlags::USR)
            .unwrap();
        core.elevate(root, user, CapFlags::NET, Duration::from_secs(60));
        core.housekeeping();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.lines().count() >= 1);

        let _ = std::fs::remove_file(&path);
    }
}
