//! Bounded ring-buffer pipes, per spec.md §4.8.
//!
//! Shaped after the teacher's `ipc::pipe` (`kernel/hadron-kernel/src/ipc/
//! pipe.rs`): a shared `PipeInner` behind two thin endpoint handles whose
//! `Drop` impls decrement the reader/writer count and wake the other side.
//! The teacher's endpoints poll an async future; this simulation has no
//! async runtime (see `kos_core::sync::WaitQueue`'s module doc), so the
//! same poll-then-park loop is expressed as a blocking call instead.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use kos_core::error::{KError, KResult};
use kos_core::id::InodeId;
use kos_core::sync::WaitQueue;
use kos_fs::{DirEntry, FileStat, InodeType, Mode, VNode};

/// Default pipe capacity, per spec.md §4.8.
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

struct RingBuffer {
    data: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
    len: usize,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
            len: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn is_full(&self) -> bool {
        self.len == self.data.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.len);
        for slot in buf.iter_mut().take(n) {
            *slot = self.data[self.read_pos];
            self.read_pos = (self.read_pos + 1) % self.data.len();
        }
        self.len -= n;
        n
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        let n = buf.len().min(self.data.len() - self.len);
        for &byte in buf.iter().take(n) {
            self.data[self.write_pos] = byte;
            self.write_pos = (self.write_pos + 1) % self.data.len();
        }
        self.len += n;
        n
    }
}

struct PipeInner {
    id: InodeId,
    buffer: Mutex<RingBuffer>,
    read_wq: WaitQueue,
    write_wq: WaitQueue,
    readers: AtomicUsize,
    writers: AtomicUsize,
}

fn not_a_directory<T>() -> KResult<T> {
    Err(KError::NotDirectory)
}

fn wrong_end<T>() -> KResult<T> {
    Err(KError::InvalidArgument)
}

/// Creates a connected pair of pipe endpoints: `(read_end, write_end)`.
#[must_use]
pub fn pipe(id: InodeId, capacity: usize) -> (Arc<dyn VNode>, Arc<dyn VNode>) {
    let inner = Arc::new(PipeInner {
        id,
        buffer: Mutex::new(RingBuffer::new(capacity.max(1))),
        read_wq: WaitQueue::new(),
        write_wq: WaitQueue::new(),
        readers: AtomicUsize::new(1),
        writers: AtomicUsize::new(1),
    });
    let read_end = Arc::new(PipeReadEnd { inner: inner.clone() });
    let write_end = Arc::new(PipeWriteEnd { inner });
    (read_end, write_end)
}

/// The readable half of a pipe.
pub struct PipeReadEnd {
    inner: Arc<PipeInner>,
}

/// The writable half of a pipe.
pub struct PipeWriteEnd {
    inner: Arc<PipeInner>,
}

impl Drop for PipeReadEnd {
    fn drop(&mut self) {
        if self.inner.readers.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Last reader gone: wake any blocked writer so it observes
            // `BrokenPipe` instead of waiting forever.
            self.inner.write_wq.wake_all();
        }
    }
}

impl Drop for PipeWriteEnd {
    fn drop(&mut self) {
        if self.inner.writers.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Last writer gone: wake any blocked reader so it observes EOF.
            self.inner.read_wq.wake_all();
        }
    }
}

fn pipe_stat(id: InodeId, size: u64) -> FileStat {
    FileStat {
        inode: id,
        vtype: InodeType::Fifo,
        mode: Mode::from_octal(0o600),
        uid: 0,
        gid: 0,
        size,
        atime_nanos: 0,
        mtime_nanos: 0,
        ctime_nanos: 0,
        nlink: 1,
    }
}

impl VNode for PipeReadEnd {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn inode_id(&self) -> InodeId {
        self.inner.id
    }

    fn inode_type(&self) -> InodeType {
        InodeType::Fifo
    }

    fn stat(&self) -> KResult<FileStat> {
        let len = self.inner.buffer.lock().len as u64;
        Ok(pipe_stat(self.inner.id, len))
    }

    fn setattr(&self, _mode: Option<Mode>, _uid: Option<u32>, _gid: Option<u32>) -> KResult<()> {
        Ok(())
    }

    /// Blocks until at least one byte is available, the buffer is empty and
    /// every writer has closed (returns `Ok(0)`, EOF), or a reader is woken
    /// spuriously and must recheck, per spec.md §4.8.
    fn read(&self, _offset: u64, buf: &mut [u8]) -> KResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            {
                let mut ring = self.inner.buffer.lock();
                if !ring.is_empty() {
                    let n = ring.read(buf);
                    drop(ring);
                    self.inner.write_wq.wake_one();
                    return Ok(n);
                }
                if self.inner.writers.load(Ordering::Acquire) == 0 {
                    return Ok(0);
                }
            }
            self.inner.read_wq.wait();
        }
    }

    fn write(&self, _offset: u64, _buf: &[u8]) -> KResult<usize> {
        wrong_end()
    }

    fn truncate(&self, _len: u64) -> KResult<()> {
        Err(KError::InvalidArgument)
    }

    fn lookup(&self, _name: &str) -> KResult<Arc<dyn VNode>> {
        not_a_directory()
    }

    fn create(&self, _name: &str, _vtype: InodeType, _mode: Mode) -> KResult<Arc<dyn VNode>> {
        not_a_directory()
    }

    fn mkdir(&self, _name: &str, _mode: Mode) -> KResult<Arc<dyn VNode>> {
        not_a_directory()
    }

    fn unlink(&self, _name: &str) -> KResult<()> {
        not_a_directory()
    }

    fn rmdir(&self, _name: &str) -> KResult<()> {
        not_a_directory()
    }

    fn symlink(&self, _name: &str, _target: &str) -> KResult<Arc<dyn VNode>> {
        not_a_directory()
    }

    fn link(&self, _name: &str, _target: &Arc<dyn VNode>) -> KResult<()> {
        not_a_directory()
    }

    fn rename(&self, _old_name: &str, _new_dir: &Arc<dyn VNode>, _new_name: &str) -> KResult<()> {
        not_a_directory()
    }

    fn readdir(&self) -> KResult<Vec<DirEntry>> {
        not_a_directory()
    }

    fn read_link(&self) -> KResult<String> {
        Err(KError::InvalidArgument)
    }
}

impl VNode for PipeWriteEnd {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn inode_id(&self) -> InodeId {
        self.inner.id
    }

    fn inode_type(&self) -> InodeType {
        InodeType::Fifo
    }

    fn stat(&self) -> KResult<FileStat> {
        let len = self.inner.buffer.lock().len as u64;
        Ok(pipe_stat(self.inner.id, len))
    }

    fn setattr(&self, _mode: Option<Mode>, _uid: Option<u32>, _gid: Option<u32>) -> KResult<()> {
        Ok(())
    }

    fn read(&self, _offset: u64, _buf: &mut [u8]) -> KResult<usize> {
        wrong_end()
    }

    /// Blocks while the buffer is full and at least one reader remains
    /// open; fails `BrokenPipe` the instant the last reader closes, per
    /// spec.md §4.8 ("closing all read ends causes writes to fail with
    /// `BrokenPipe` and signal SIGPIPE to the writer"). Signal delivery
    /// itself is `kos-kernel`'s job; this layer only reports the error.
    fn write(&self, _offset: u64, buf: &[u8]) -> KResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.inner.readers.load(Ordering::Acquire) == 0 {
                return Err(KError::BrokenPipe);
            }
            {
                let mut ring = self.inner.buffer.lock();
                if !ring.is_full() {
                    let n = ring.write(buf);
                    drop(ring);
                    self.inner.read_wq.wake_one();
                    return Ok(n);
                }
            }
            self.inner.write_wq.wait();
        }
    }

    fn truncate(&self, _len: u64) -> KResult<()> {
        Err(KError::InvalidArgument)
    }

    fn lookup(&self, _name: &str) -> KResult<Arc<dyn VNode>> {
        not_a_directory()
    }

    fn create(&self, _name: &str, _vtype: InodeType, _mode: Mode) -> KResult<Arc<dyn VNode>> {
        not_a_directory()
    }

    fn mkdir(&self, _name: &str, _mode: Mode) -> KResult<Arc<dyn VNode>> {
        not_a_directory()
    }

    fn unlink(&self, _name: &str) -> KResult<()> {
        not_a_directory()
    }

    fn rmdir(&self, _name: &str) -> KResult<()> {
        not_a_directory()
    }

    fn symlink(&self, _name: &str, _target: &str) -> KResult<Arc<dyn VNode>> {
        not_a_directory()
    }

    fn link(&self, _name: &str, _target: &Arc<dyn VNode>) -> KResult<()> {
        not_a_directory()
    }

    fn rename(&self, _old_name: &str, _new_dir: &Arc<dyn VNode>, _new_name: &str) -> KResult<()> {
        not_a_directory()
    }

    fn readdir(&self) -> KResult<Vec<DirEntry>> {
        not_a_directory()
    }

    fn read_link(&self) -> KResult<String> {
        Err(KError::InvalidArgument)
    }
}
