//! Page frame allocation, slab caches, and per-process address spaces.
//!
//! Three layers, leaf to root: [`buddy`] hands out power-of-two runs of
//! page frames; [`slab`] carves buddy blocks into fixed-size object caches;
//! [`vm`] models one process's virtual address space (regions, protection,
//! mmap/munmap/mprotect, fork-time copy-on-write) over frames drawn from a
//! shared buddy pool.

pub mod buddy;
pub mod slab;
pub mod vm;

pub use buddy::{BuddyAllocator, Frame, MAX_ORDER, PAGE_SIZE};
pub use slab::{SlabCache, SlabObject, SlabRegistry};
pub use vm::{AddressSpace, MapFlags, MappingKind, Protection, Region, Sharing};
