//! Slab allocator: named fixed-size object caches over buddy-allocated pages.
//!
//! Each [`SlabCache`] owns a list of slabs, where a slab is one page-aligned
//! block obtained from a [`BuddyAllocator`] and subdivided into equal-sized,
//! equal-aligned objects tracked by a free bitmap. `alloc` prefers a partial
//! slab over growing a new one; `free` returns an object to its slab and, if
//! the slab becomes fully free and the cache already holds more empty slabs
//! than its reserve, releases the slab's backing frame back to the buddy
//! allocator.

use std::collections::HashMap;

use kos_core::error::{KError, KResult};

use crate::buddy::{BuddyAllocator, Frame, PAGE_SIZE};

/// A handle to a single object inside a cache, opaque to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlabObject {
    slab_index: usize,
    object_index: usize,
}

struct Slab {
    frame: Frame,
    /// `true` at index `i` means object `i` is allocated.
    used: Vec<bool>,
    live_count: usize,
}

impl Slab {
    fn objects_per_slab(frame: Frame, object_size: usize) -> usize {
        (frame.page_count() * PAGE_SIZE) / object_size
    }
}

/// A named object cache of fixed object size and alignment.
pub struct SlabCache {
    name: String,
    object_size: usize,
    /// Buddy block order used for each slab's backing storage; chosen once
    /// at cache creation to fit at least one object.
    slab_order: u8,
    /// Empty slabs beyond this count are released immediately on becoming
    /// empty rather than held in reserve.
    reserve: usize,
    slabs: Vec<Slab>,
}

impl SlabCache {
    /// Creates a cache named `name` for objects of `object_size` bytes.
    ///
    /// `reserve` controls how many fully-empty slabs the cache keeps around
    /// (rather than returning to the buddy allocator) to absorb allocation
    /// churn without repeatedly round-tripping through `BuddyAllocator`.
    ///
    /// # Errors
    ///
    /// Returns [`KError::InvalidArgument`] if `object_size` is zero or
    /// larger than the largest buddy block (`2^MAX_ORDER` pages).
    pub fn new(name: impl Into<String>, object_size: usize, reserve: usize) -> KResult<Self> {
        if object_size == 0 {
            return Err(KError::InvalidArgument);
        }
        let max_bytes = (1usize << crate::buddy::MAX_ORDER) * PAGE_SIZE;
        if object_size > max_bytes {
            return Err(KError::InvalidArgument);
        }

        let mut order = 0u8;
        while ((1usize << order) * PAGE_SIZE) < object_size {
            order += 1;
        }

        Ok(Self {
            name: name.into(),
            object_size,
            slab_order: order,
            reserve,
            slabs: Vec::new(),
        })
    }

    /// Cache name, used for observability and error messages.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Allocates one object, growing the cache with a new slab from
    /// `buddy` if no partial slab has room.
    ///
    /// # Errors
    ///
    /// Propagates [`KError::OutOfMemory`] from the buddy allocator when a
    /// new slab is needed but the pool is exhausted.
    pub fn alloc(&mut self, buddy: &mut BuddyAllocator) -> KResult<SlabObject> {
        if let Some((slab_index, object_index)) = self.find_partial() {
            self.slabs[slab_index].used[object_index] = true;
            self.slabs[slab_index].live_count += 1;
            return Ok(SlabObject {
                slab_index,
                object_index,
            });
        }

        let frame = buddy.alloc(self.slab_order as usize)?;
        let capacity = Slab::objects_per_slab(frame, self.object_size);
        self.slabs.push(Slab {
            frame,
            used: vec![false; capacity],
            live_count: 0,
        });

        let slab_index = self.slabs.len() - 1;
        self.slabs[slab_index].used[0] = true;
        self.slabs[slab_index].live_count = 1;
        Ok(SlabObject {
            slab_index,
            object_index: 0,
        })
    }

    /// Returns `obj` to its slab. If the slab becomes fully free and the
    /// cache already holds `reserve` or more empty slabs, the slab's frame
    /// is released back to `buddy`.
    ///
    /// # Errors
    ///
    /// Returns [`KError::BadState`] if `obj` refers to an already-free slot
    /// or a slab index that no longer exists (double free).
    pub fn free(&mut self, buddy: &mut BuddyAllocator, obj: SlabObject) -> KResult<()> {
        let slab = self
            .slabs
            .get_mut(obj.slab_index)
            .ok_or(KError::BadState)?;
        let slot = slab
            .used
            .get_mut(obj.object_index)
            .ok_or(KError::BadState)?;
        if !*slot {
            return Err(KError::BadState);
        }
        *slot = false;
        slab.live_count -= 1;

        if slab.live_count == 0 {
            let empty_slabs = self.slabs.iter().filter(|s| s.live_count == 0).count();
            if empty_slabs > self.reserve {
                let frame = self.slabs[obj.slab_index].frame;
                self.slabs.remove(obj.slab_index);
                buddy.free(frame)?;
            }
        }
        Ok(())
    }

    /// Total objects currently live across all slabs.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.slabs.iter().map(|s| s.live_count).sum()
    }

    /// Number of slabs currently owned by the cache.
    #[must_use]
    pub fn slab_count(&self) -> usize {
        self.slabs.len()
    }

    fn find_partial(&self) -> Option<(usize, usize)> {
        for (slab_index, slab) in self.slabs.iter().enumerate() {
            if let Some(object_index) = slab.used.iter().position(|used| !used) {
                return Some((slab_index, object_index));
            }
        }
        None
    }
}

/// A registry of named slab caches, mirroring how a kernel exposes one
/// cache per fixed-size kernel object type (PCBs, dentries, pipe buffers).
#[derive(Default)]
pub struct SlabRegistry {
    caches: HashMap<String, SlabCache>,
}

impl SlabRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new cache, replacing any previous cache of the same name.
    pub fn register(&mut self, cache: SlabCache) {
        self.caches.insert(cache.name().to_string(), cache);
    }

    /// Returns a mutable reference to the cache named `name`, if registered.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut SlabCache> {
        self.caches.get_mut(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_reuses_partial_slab() {
        let mut buddy = BuddyAllocator::new(16).unwrap();
        let mut cache = SlabCache::new("test", 64, 0).unwrap();

        let a = cache.alloc(&mut buddy).unwrap();
        let b = cache.alloc(&mut buddy).unwrap();
        assert_eq!(a.slab_index, b.slab_index);
        assert_eq!(cache.slab_count(), 1);
    }

    #[test]
    fn alloc_grows_new_slab_when_full() {
        let mut buddy = BuddyAllocator::new(16).unwrap();
        // Order-0 slab is one page (4096 bytes); with 2048-byte objects that
        // is 2 objects per slab.
        let mut cache = SlabCache::new("test", 2048, 0).unwrap();

        let a = cache.alloc(&mut buddy).unwrap();
        let b = cache.alloc(&mut buddy).unwrap();
        assert_eq!(a.slab_index, b.slab_index);

        let c = cache.alloc(&mut buddy).unwrap();
        assert_ne!(c.slab_index, a.slab_index);
        assert_eq!(cache.slab_count(), 2);
    }

    #[test]
    fn free_releases_empty_slab_beyond_reserve() {
        let mut buddy = BuddyAllocator::new(16).unwrap();
        let mut cache = SlabCache::new("test", 4096, 0).unwrap();

        let a = cache.alloc(&mut buddy).unwrap();
        assert_eq!(cache.slab_count(), 1);
        cache.free(&mut buddy, a).unwrap();
        assert_eq!(cache.slab_count(), 0);
        assert_eq!(buddy.allocated_frames(), 0);
    }

    #[test]
    fn free_keeps_empty_slab_within_reserve() {
        let mut buddy = BuddyAllocator::new(16).unwrap();
        let mut cache = SlabCache::new("test", 4096, 1).unwrap();

        let a = cache.alloc(&mut buddy).unwrap();
        cache.free(&mut buddy, a).unwrap();
        assert_eq!(cache.slab_count(), 1);
        assert_eq!(buddy.allocated_frames(), 1);
    }

    #[test]
    fn double_free_is_rejected() {
        let mut buddy = BuddyAllocator::new(16).unwrap();
        let mut cache = SlabCache::new("test", 4096, 1).unwrap();

        let a = cache.alloc(&mut buddy).unwrap();
        cache.free(&mut buddy, a).unwrap();
        assert_eq!(cache.free(&mut buddy, a).unwrap_err(), KError::BadState);
    }

    #[test]
    fn objects_are_not_shared_across_caches() {
        let mut buddy = BuddyAllocator::new(16).unwrap();
        let mut cache_a = SlabCache::new("a", 64, 0).unwrap();
        let mut cache_b = SlabCache::new("b", 64, 0).unwrap();

        let obj_a = cache_a.alloc(&mut buddy).unwrap();
        let _obj_b = cache_b.alloc(&mut buddy).unwrap();

        // Freeing an object from the wrong cache is a logic error the
        // caller must avoid by construction; cache_b does not own obj_a's
        // slab index space so this would at best mutate unrelated state.
        // Exercise that each cache tracks its own live count independently.
        assert_eq!(cache_a.live_objects(), 1);
        assert_eq!(cache_b.live_objects(), 1);
        cache_a.free(&mut buddy, obj_a).unwrap();
        assert_eq!(cache_a.live_objects(), 0);
        assert_eq!(cache_b.live_objects(), 1);
    }
}
