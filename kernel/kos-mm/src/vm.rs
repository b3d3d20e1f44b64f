//! Per-process address space: mmap/munmap/mprotect and copy-on-write.
//!
//! An [`AddressSpace`] is an ordered, disjoint set of [`Region`]s over a
//! shared [`BuddyAllocator`] pool. Frames are only allocated lazily, on
//! [`AddressSpace::page_fault`], mirroring the spec's "page faults in a
//! mapped region allocate a backing frame" rule rather than eagerly wiring
//! every page at `mmap` time. [`AddressSpace::fork_clone`] shares a
//! private region's frames with the child via reference counting; the
//! first write to a shared frame after the fork duplicates it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use bitflags::bitflags;
use kos_core::error::{KError, KResult};

use crate::buddy::{BuddyAllocator, Frame, PAGE_SIZE};

/// Top of the auto-placement zone for `mmap(addr_hint=0, ...)`, which grows
/// downward as in a typical x86-64 mmap area. Chosen well below the
/// architecture's canonical-address ceiling since this is a simulated,
/// not a real, address space.
const HIGH_ZONE_TOP: usize = 0x7000_0000_0000;

bitflags! {
    /// Page protection bits, matching the `{R,W,X}` triple from spec.md §3.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u8 {
        /// Readable.
        const READ = 0b001;
        /// Writable.
        const WRITE = 0b010;
        /// Executable.
        const EXEC = 0b100;
    }
}

bitflags! {
    /// Flags accepted by [`AddressSpace::mmap`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u8 {
        /// The mapping is shared: writes are visible to every mapper and
        /// across `fork_clone`, and are never duplicated on write fault.
        const SHARED = 0b01;
        /// Place the mapping at exactly `addr_hint`, removing any existing
        /// overlap rather than failing.
        const FIXED = 0b10;
    }
}

/// Whether a mapping is backed by anonymous (zero-fill) memory or a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    /// Zero-filled on first touch.
    Anonymous,
    /// Backed by a file, read through a [`FileBackingStore`].
    File,
}

/// Whether a region's frames are private to this address space (subject to
/// copy-on-write once shared by `fork_clone`) or shared unconditionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sharing {
    /// COW-duplicated on the first write after being shared with a child.
    Private,
    /// Always shared; writes are visible to every holder, never duplicated.
    Shared,
}

/// Supplies the initial contents of a file-backed page on first fault.
///
/// Kept as a trait rather than a direct dependency on `kos-fs`, since
/// `kos-mm` sits below the filesystem layer in the dependency order from
/// spec.md §2; `kos-kernel` wires a VFS-backed implementation in.
pub trait FileBackingStore: Send + Sync {
    /// Reads one page worth of bytes starting at `offset` into the file,
    /// zero-padding past end-of-file.
    fn read_page(&self, offset: u64) -> KResult<[u8; PAGE_SIZE]>;
}

/// A frame owned by exactly the address-space regions holding a clone of
/// this `Arc`; dropping the last clone returns the frame to the pool.
struct FrameCell {
    frame: Frame,
    pool: Arc<Mutex<BuddyAllocator>>,
}

impl Drop for FrameCell {
    fn drop(&mut self) {
        let _ = self.pool.lock().unwrap().free(self.frame);
    }
}

type PageRef = Arc<FrameCell>;

/// One non-overlapping virtual memory region.
pub struct Region {
    /// Page-aligned start address.
    pub start: usize,
    /// Page-aligned end address (exclusive).
    pub end: usize,
    /// Current protection bits.
    pub prot: Protection,
    /// Anonymous or file-backed.
    pub kind: MappingKind,
    /// Private (COW) or shared.
    pub sharing: Sharing,
    /// File offset backing `start`, when `kind == MappingKind::File`.
    file_offset: u64,
    file_source: Option<Arc<dyn FileBackingStore>>,
    /// Present pages, keyed by page index relative to `start`. Absent until
    /// first touched by [`AddressSpace::page_fault`].
    pages: BTreeMap<usize, PageRef>,
}

impl Region {
    fn len(&self) -> usize {
        self.end - self.start
    }

    fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }

    fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }

    /// Two regions coalesce when adjacent and attribute-identical, per the
    /// canonicalization invariant in spec.md §3.
    fn mergeable_with(&self, other: &Region) -> bool {
        self.end == other.start
            && self.prot == other.prot
            && self.kind == other.kind
            && self.sharing == other.sharing
            && self.pages.is_empty()
            && other.pages.is_empty()
    }
}

/// Kind of memory access a page fault is servicing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// A load.
    Read,
    /// A store.
    Write,
    /// An instruction fetch.
    Exec,
}

/// One process's virtual address space: an ordered, disjoint set of regions
/// over a pool of page frames shared with every other address space in the
/// simulation.
pub struct AddressSpace {
    pool: Arc<Mutex<BuddyAllocator>>,
    regions: Vec<Region>,
    next_high_addr: usize,
}

impl AddressSpace {
    /// Creates an empty address space over a shared frame pool.
    #[must_use]
    pub fn new(pool: Arc<Mutex<BuddyAllocator>>) -> Self {
        Self {
            pool,
            regions: Vec::new(),
            next_high_addr: HIGH_ZONE_TOP,
        }
    }

    /// Maps `len` bytes of memory.
    ///
    /// `addr_hint = 0` auto-places the mapping in the high-address zone,
    /// growing down. A nonzero `addr_hint` must be honored exactly: it
    /// succeeds only if the range is free, unless `flags` contains
    /// [`MapFlags::FIXED`], in which case any overlap is unmapped first.
    ///
    /// # Errors
    ///
    /// [`KError::InvalidArgument`] for a zero or unaligned `len`, or an
    /// unaligned nonzero `addr_hint`. [`KError::InvalidAddress`] when a
    /// nonzero non-`FIXED` hint overlaps an existing region.
    /// [`KError::NoMemory`]-equivalent [`KError::OutOfMemory`] when no gap
    /// is large enough in the auto-placement zone.
    pub fn mmap(
        &mut self,
        addr_hint: usize,
        len: usize,
        prot: Protection,
        flags: MapFlags,
        source: Option<(Arc<dyn FileBackingStore>, u64)>,
    ) -> KResult<usize> {
        if len == 0 || len % PAGE_SIZE != 0 {
            return Err(KError::InvalidArgument);
        }
        if addr_hint % PAGE_SIZE != 0 {
            return Err(KError::InvalidArgument);
        }

        let start = if addr_hint == 0 {
            self.find_gap_growing_down(len)?
        } else if flags.contains(MapFlags::FIXED) {
            self.unmap(addr_hint, len)?;
            addr_hint
        } else {
            if self.regions.iter().any(|r| r.overlaps(addr_hint, addr_hint + len)) {
                return Err(KError::InvalidAddress);
            }
            addr_hint
        };

        let sharing = if flags.contains(MapFlags::SHARED) {
            Sharing::Shared
        } else {
            Sharing::Private
        };
        let (kind, file_offset, file_source) = match source {
            Some((store, offset)) => (MappingKind::File, offset, Some(store)),
            None => (MappingKind::Anonymous, 0, None),
        };

        let region = Region {
            start,
            end: start + len,
            prot,
            kind,
            sharing,
            file_offset,
            file_source,
            pages: BTreeMap::new(),
        };
        self.insert_region(region);
        Ok(start)
    }

    /// Unmaps `[addr, addr + len)`, trimming or removing any region it
    /// overlaps. Unmapping a range with no mapping is a no-op success, as
    /// in POSIX `munmap`.
    ///
    /// # Errors
    ///
    /// [`KError::InvalidArgument`] for a zero-length or unaligned range.
    pub fn munmap(&mut self, addr: usize, len: usize) -> KResult<()> {
        if len == 0 || addr % PAGE_SIZE != 0 || len % PAGE_SIZE != 0 {
            return Err(KError::InvalidArgument);
        }
        let end = addr + len;
        let mut kept = Vec::with_capacity(self.regions.len());
        for region in self.regions.drain(..) {
            if !region.overlaps(addr, end) {
                kept.push(region);
                continue;
            }
            if region.start < addr {
                kept.push(self.split_left(&region, addr));
            }
            if region.end > end {
                kept.push(self.split_right(&region, end));
            }
            // The middle slice (the part inside [addr, end)) is simply
            // dropped here, returning its frames via `FrameCell::drop`.
        }
        kept.sort_by_key(|r| r.start);
        self.regions = kept;
        Ok(())
    }

    /// Changes protection on `[addr, addr + len)`. Every byte in the range
    /// must already be mapped.
    ///
    /// # Errors
    ///
    /// [`KError::InvalidArgument`] for a zero-length or unaligned range.
    /// [`KError::InvalidAddress`] if any page in the range is unmapped.
    pub fn mprotect(&mut self, addr: usize, len: usize, prot: Protection) -> KResult<()> {
        if len == 0 || addr % PAGE_SIZE != 0 || len % PAGE_SIZE != 0 {
            return Err(KError::InvalidArgument);
        }
        let end = addr + len;
        if !self.fully_covered(addr, end) {
            return Err(KError::InvalidAddress);
        }

        let mut rebuilt = Vec::with_capacity(self.regions.len() + 2);
        for region in self.regions.drain(..) {
            if !region.overlaps(addr, end) {
                rebuilt.push(region);
                continue;
            }
            if region.start < addr {
                rebuilt.push(self.split_left(&region, addr));
            }
            let mid_start = region.start.max(addr);
            let mid_end = region.end.min(end);
            rebuilt.push(self.sub_region(&region, mid_start, mid_end, prot));
            if region.end > end {
                rebuilt.push(self.split_right(&region, end));
            }
        }
        rebuilt.sort_by_key(|r| r.start);
        self.regions = Self::coalesce(rebuilt);
        Ok(())
    }

    /// Services a fault at `addr` for the given access kind.
    ///
    /// Allocates a backing frame on first touch (zero-filled for anonymous
    /// regions, read from the backing store for file-backed ones) and
    /// duplicates a copy-on-write frame on the first write after
    /// `fork_clone` shared it.
    ///
    /// # Errors
    ///
    /// [`KError::InvalidAddress`] if `addr` falls outside every region
    /// (the caller should deliver `SIGSEGV`). [`KError::PermissionDenied`]
    /// if the region's protection does not permit `access`.
    pub fn page_fault(&mut self, addr: usize, access: Access) -> KResult<()> {
        let idx = self
            .regions
            .iter()
            .position(|r| r.contains(addr))
            .ok_or(KError::InvalidAddress)?;

        {
            let region = &self.regions[idx];
            let required = match access {
                Access::Read => Protection::READ,
                Access::Write => Protection::WRITE,
                Access::Exec => Protection::EXEC,
            };
            if !region.prot.contains(required) {
                return Err(KError::PermissionDenied);
            }
        }

        let page_idx = (addr - self.regions[idx].start) / PAGE_SIZE;
        let already_present = self.regions[idx].pages.contains_key(&page_idx);

        if !already_present {
            let frame = self.pool.lock().unwrap().alloc(0)?;
            let region = &self.regions[idx];
            match (&region.kind, &region.file_source) {
                (MappingKind::File, Some(store)) => {
                    let file_off = region.file_offset + (page_idx * PAGE_SIZE) as u64;
                    let bytes = store.read_page(file_off)?;
                    self.pool
                        .lock()
                        .unwrap()
                        .page_bytes_mut(frame.base_frame)
                        .copy_from_slice(&bytes);
                }
                _ => {
                    self.pool.lock().unwrap().page_bytes_mut(frame.base_frame).fill(0);
                }
            }
            self.regions[idx].pages.insert(
                page_idx,
                Arc::new(FrameCell {
                    frame,
                    pool: self.pool.clone(),
                }),
            );
            return Ok(());
        }

        if access == Access::Write && self.regions[idx].sharing == Sharing::Private {
            self.duplicate_if_shared(idx, page_idx)?;
        }
        Ok(())
    }

    /// Clones this address space for a forked child. Private regions share
    /// their frames (bumping the reference count); the next write to a
    /// shared frame triggers copy-on-write in [`page_fault`](Self::page_fault).
    /// Shared regions also share frames, but are never duplicated.
    #[must_use]
    pub fn fork_clone(&self) -> Self {
        let regions = self
            .regions
            .iter()
            .map(|r| Region {
                start: r.start,
                end: r.end,
                prot: r.prot,
                kind: r.kind,
                sharing: r.sharing,
                file_offset: r.file_offset,
                file_source: r.file_source.clone(),
                pages: r.pages.clone(),
            })
            .collect();
        Self {
            pool: self.pool.clone(),
            regions,
            next_high_addr: self.next_high_addr,
        }
    }

    /// Returns the regions currently mapped, ordered by start address.
    #[must_use]
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    fn duplicate_if_shared(&mut self, region_idx: usize, page_idx: usize) -> KResult<()> {
        let needs_dup = {
            let cell = &self.regions[region_idx].pages[&page_idx];
            Arc::strong_count(cell) > 1
        };
        if !needs_dup {
            return Ok(());
        }
        let old_frame = self.regions[region_idx].pages[&page_idx].frame;
        let new_frame = self.pool.lock().unwrap().alloc(0)?;
        {
            let mut pool = self.pool.lock().unwrap();
            let data = pool.page_bytes(old_frame.base_frame).to_vec();
            pool.page_bytes_mut(new_frame.base_frame).copy_from_slice(&data);
        }
        self.regions[region_idx].pages.insert(
            page_idx,
            Arc::new(FrameCell {
                frame: new_frame,
                pool: self.pool.clone(),
            }),
        );
        Ok(())
    }

    fn find_gap_growing_down(&mut self, len: usize) -> KResult<usize> {
        let mut candidate = self.next_high_addr.checked_sub(len).ok_or(KError::OutOfMemory)?;
        candidate -= candidate % PAGE_SIZE;
        loop {
            match self.regions.iter().find(|r| r.overlaps(candidate, candidate + len)) {
                None => {
                    self.next_high_addr = candidate;
                    return Ok(candidate);
                }
                Some(r) => {
                    candidate = r.start.checked_sub(len).ok_or(KError::OutOfMemory)?;
                }
            }
        }
    }

    fn fully_covered(&self, start: usize, end: usize) -> bool {
        let mut covered = start;
        let mut sorted: Vec<&Region> = self.regions.iter().filter(|r| r.overlaps(start, end)).collect();
        sorted.sort_by_key(|r| r.start);
        for region in sorted {
            if region.start > covered {
                return false;
            }
            covered = covered.max(region.end);
        }
        covered >= end
    }

    fn insert_region(&mut self, region: Region) {
        self.regions.push(region);
        self.regions.sort_by_key(|r| r.start);
        let merged = Self::coalesce(std::mem::take(&mut self.regions));
        self.regions = merged;
    }

    fn coalesce(regions: Vec<Region>) -> Vec<Region> {
        let mut out: Vec<Region> = Vec::with_capacity(regions.len());
        for region in regions {
            if let Some(last) = out.last() {
                if last.mergeable_with(&region) {
                    let prev = out.pop().unwrap();
                    out.push(Region {
                        start: prev.start,
                        end: region.end,
                        prot: prev.prot,
                        kind: prev.kind,
                        sharing: prev.sharing,
                        file_offset: prev.file_offset,
                        file_source: prev.file_source,
                        pages: BTreeMap::new(),
                    });
                    continue;
                }
            }
            out.push(region);
        }
        out
    }

    /// Returns the portion of `region` strictly left of `boundary`.
    fn split_left(&self, region: &Region, boundary: usize) -> Region {
        self.sub_region(region, region.start, boundary, region.prot)
    }

    /// Returns the portion of `region` at or right of `boundary`.
    fn split_right(&self, region: &Region, boundary: usize) -> Region {
        self.sub_region(region, boundary, region.end, region.prot)
    }

    fn sub_region(&self, region: &Region, start: usize, end: usize, prot: Protection) -> Region {
        let base_page = (start - region.start) / PAGE_SIZE;
        let page_count = (end - start) / PAGE_SIZE;
        let pages = region
            .pages
            .iter()
            .filter(|(idx, _)| **idx >= base_page && **idx < base_page + page_count)
            .map(|(idx, cell)| (idx - base_page, cell.clone()))
            .collect();
        Region {
            start,
            end,
            prot,
            kind: region.kind,
            sharing: region.sharing,
            file_offset: region.file_offset + (base_page * PAGE_SIZE) as u64,
            file_source: region.file_source.clone(),
            pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(frames: usize) -> Arc<Mutex<BuddyAllocator>> {
        Arc::new(Mutex::new(BuddyAllocator::new(frames).unwrap()))
    }

    #[test]
    fn mmap_auto_placement_grows_down_and_is_page_aligned() {
        let mut space = AddressSpace::new(pool(64));
        let a = space
            .mmap(0, PAGE_SIZE, Protection::READ | Protection::WRITE, MapFlags::empty(), None)
            .unwrap();
        let b = space
            .mmap(0, PAGE_SIZE, Protection::READ | Protection::WRITE, MapFlags::empty(), None)
            .unwrap();
        assert_eq!(a % PAGE_SIZE, 0);
        assert!(b < a, "second mapping should sit below the first");
    }

    #[test]
    fn mmap_zero_length_is_invalid() {
        let mut space = AddressSpace::new(pool(64));
        assert_eq!(
            space
                .mmap(0, 0, Protection::READ, MapFlags::empty(), None)
                .unwrap_err(),
            KError::InvalidArgument
        );
    }

    #[test]
    fn mmap_fixed_hint_without_conflict_succeeds_exactly() {
        let mut space = AddressSpace::new(pool(64));
        let addr = space
            .mmap(0x4000, PAGE_SIZE, Protection::READ, MapFlags::empty(), None)
            .unwrap();
        assert_eq!(addr, 0x4000);
    }

    #[test]
    fn mmap_nonzero_hint_conflict_without_fixed_fails() {
        let mut space = AddressSpace::new(pool(64));
        space
            .mmap(0x4000, PAGE_SIZE, Protection::READ, MapFlags::empty(), None)
            .unwrap();
        let err = space
            .mmap(0x4000, PAGE_SIZE, Protection::READ, MapFlags::empty(), None)
            .unwrap_err();
        assert_eq!(err, KError::InvalidAddress);
    }

    #[test]
    fn mmap_fixed_overlap_replaces_existing_mapping() {
        let mut space = AddressSpace::new(pool(64));
        space
            .mmap(0x4000, PAGE_SIZE * 2, Protection::READ, MapFlags::empty(), None)
            .unwrap();
        space
            .mmap(0x4000, PAGE_SIZE, Protection::WRITE, MapFlags::FIXED, None)
            .unwrap();
        assert_eq!(space.regions().len(), 2);
        assert_eq!(space.regions()[0].prot, Protection::WRITE);
    }

    #[test]
    fn munmap_then_mmap_returns_address_space_to_prior_shape() {
        let mut space = AddressSpace::new(pool(64));
        let addr = space
            .mmap(0x4000, PAGE_SIZE, Protection::READ, MapFlags::empty(), None)
            .unwrap();
        space.munmap(addr, PAGE_SIZE).unwrap();
        assert!(space.regions().is_empty());
    }

    #[test]
    fn page_fault_outside_any_region_is_invalid_address() {
        let mut space = AddressSpace::new(pool(64));
        assert_eq!(
            space.page_fault(0x1234, Access::Read).unwrap_err(),
            KError::InvalidAddress
        );
    }

    #[test]
    fn page_fault_without_required_protection_is_denied() {
        let mut space = AddressSpace::new(pool(64));
        let addr = space
            .mmap(0, PAGE_SIZE, Protection::READ, MapFlags::empty(), None)
            .unwrap();
        assert_eq!(
            space.page_fault(addr, Access::Write).unwrap_err(),
            KError::PermissionDenied
        );
    }

    #[test]
    fn anonymous_page_fault_zero_fills() {
        let mut space = AddressSpace::new(pool(64));
        let addr = space
            .mmap(0, PAGE_SIZE, Protection::READ | Protection::WRITE, MapFlags::empty(), None)
            .unwrap();
        space.page_fault(addr, Access::Write).unwrap();
        let frame = space.regions()[0].pages[&0].frame;
        assert!(space.pool.lock().unwrap().page_bytes(frame.base_frame).iter().all(|&b| b == 0));
    }

    #[test]
    fn fork_then_write_duplicates_private_page() {
        let mut parent = AddressSpace::new(pool(64));
        let addr = parent
            .mmap(0, PAGE_SIZE, Protection::READ | Protection::WRITE, MapFlags::empty(), None)
            .unwrap();
        parent.page_fault(addr, Access::Write).unwrap();

        let mut child = parent.fork_clone();
        let parent_frame = parent.regions()[0].pages[&0].frame;
        let child_frame_before = child.regions()[0].pages[&0].frame;
        assert_eq!(parent_frame, child_frame_before);

        child.page_fault(addr, Access::Write).unwrap();
        let child_frame_after = child.regions()[0].pages[&0].frame;
        assert_ne!(parent_frame, child_frame_after, "write after fork must copy-on-write");

        // The parent's own mapping is untouched by the child's write.
        let parent_frame_after = parent.regions()[0].pages[&0].frame;
        assert_eq!(parent_frame, parent_frame_after);
    }

    #[test]
    fn shared_region_never_duplicates_on_write() {
        let mut parent = AddressSpace::new(pool(64));
        let addr = parent
            .mmap(
                0,
                PAGE_SIZE,
                Protection::READ | Protection::WRITE,
                MapFlags::SHARED,
                None,
            )
            .unwrap();
        parent.page_fault(addr, Access::Write).unwrap();
        let mut child = parent.fork_clone();
        child.page_fault(addr, Access::Write).unwrap();
        assert_eq!(
            parent.regions()[0].pages[&0].frame,
            child.regions()[0].pages[&0].frame
        );
    }

    #[test]
    fn mprotect_requires_full_coverage() {
        let mut space = AddressSpace::new(pool(64));
        space
            .mmap(0x4000, PAGE_SIZE, Protection::READ, MapFlags::empty(), None)
            .unwrap();
        let err = space
            .mprotect(0x4000, PAGE_SIZE * 2, Protection::READ | Protection::WRITE)
            .unwrap_err();
        assert_eq!(err, KError::InvalidAddress);
    }

    #[test]
    fn mprotect_splits_region_and_changes_only_requested_range() {
        let mut space = AddressSpace::new(pool(64));
        space
            .mmap(0x4000, PAGE_SIZE * 2, Protection::READ, MapFlags::empty(), None)
            .unwrap();
        space
            .mprotect(0x4000, PAGE_SIZE, Protection::READ | Protection::WRITE)
            .unwrap();
        assert_eq!(space.regions().len(), 2);
        assert_eq!(space.regions()[0].prot, Protection::READ | Protection::WRITE);
        assert_eq!(space.regions()[1].prot, Protection::READ);
    }

    #[test]
    fn unmapped_frames_return_to_the_pool() {
        let shared_pool = pool(64);
        let mut space = AddressSpace::new(shared_pool.clone());
        let addr = space
            .mmap(0, PAGE_SIZE, Protection::READ | Protection::WRITE, MapFlags::empty(), None)
            .unwrap();
        space.page_fault(addr, Access::Write).unwrap();
        assert_eq!(shared_pool.lock().unwrap().allocated_frames(), 1);
        space.munmap(addr, PAGE_SIZE).unwrap();
        assert_eq!(shared_pool.lock().unwrap().allocated_frames(), 0);
    }
}
