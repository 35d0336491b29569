//! Generation-checked record arenas
//!
//! The element pool and the page pool are arenas of fixed-size records
//! addressed by `u32` index. Index 0 is reserved as the null reference, so
//! record 0 of each pool is never handed out.
//!
//! Every record carries a generation counter and a LIVE flag. `allocate`
//! bumps the generation, `release` keeps it, so a [`Handle`] taken before a
//! release can tell it no longer names the same record.
//!
//! Free records are threaded through an intrusive link (`same` for
//! elements, `next` for pages). `Pool` methods expect the caller to hold the
//! allocator lock (or the growth lock exclusively); `Allocator` takes it
//! around each call.

use crate::error::{Result, ShmkvError};

use super::layout::{hdr, node, page, AreaKind, ELEMENT_SIZE, FLAG_LIVE, PAGE_HEADER_SIZE};
use super::lock::SharedLock;
use super::mapping::Mapping;

/// Field offsets describing one pool
pub(crate) struct Pool {
    pub kind: AreaKind,
    name: &'static str,
    head: usize,
    free_count: usize,
    capacity: usize,
    link: usize,
    generation: usize,
    flags: usize,
    /// Bytes cleared on allocate/release
    clear_len: usize,
}

pub(crate) const ELEMENTS: Pool = Pool {
    kind: AreaKind::Elements,
    name: "element",
    head: hdr::FREE_ELEMENT_HEAD,
    free_count: hdr::FREE_ELEMENT_COUNT,
    capacity: hdr::ELEMENT_CAPACITY,
    link: node::SAME,
    generation: node::GENERATION,
    flags: node::FLAGS,
    clear_len: ELEMENT_SIZE as usize,
};

pub(crate) const PAGES: Pool = Pool {
    kind: AreaKind::Pages,
    name: "page",
    head: hdr::FREE_PAGE_HEAD,
    free_count: hdr::FREE_PAGE_COUNT,
    capacity: hdr::PAGE_CAPACITY,
    link: page::NEXT,
    generation: page::GENERATION,
    flags: page::FLAGS,
    clear_len: PAGE_HEADER_SIZE as usize,
};

/// A record index paired with the generation it had when taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Handle {
    pub index: u32,
    pub generation: u32,
}

impl Pool {
    /// Take a record off the free list
    pub fn allocate(&self, map: &Mapping) -> Result<u32> {
        let index = map.u32_at(self.head);
        if index == 0 {
            return Err(ShmkvError::PoolExhausted { pool: self.name });
        }

        let off = map.record(self.kind, index)?;
        if map.u32_at(off + self.flags) & FLAG_LIVE != 0 {
            return Err(ShmkvError::corrupt(format!(
                "free {} list holds live record {}",
                self.name, index
            )));
        }

        let next = map.u32_at(off + self.link);
        let generation = map.u32_at(off + self.generation).wrapping_add(1);

        map.zero(off, self.clear_len);
        map.set_u32(off + self.generation, generation);
        map.set_u32(off + self.flags, FLAG_LIVE);

        map.set_u32(self.head, next);
        map.set_u32(self.free_count, map.u32_at(self.free_count).saturating_sub(1));
        if self.kind == AreaKind::Elements {
            map.set_u32(hdr::ELEMENT_COUNT, map.u32_at(hdr::ELEMENT_COUNT) + 1);
        }
        Ok(index)
    }

    /// Return a record to the free list
    pub fn release(&self, map: &Mapping, index: u32) -> Result<()> {
        let off = map.record(self.kind, index)?;
        if index == 0 || map.u32_at(off + self.flags) & FLAG_LIVE == 0 {
            return Err(ShmkvError::corrupt(format!(
                "release of {} record {} that is not live",
                self.name, index
            )));
        }

        let generation = map.u32_at(off + self.generation);
        map.zero(off, self.clear_len);
        map.set_u32(off + self.generation, generation);
        map.set_u32(off + self.link, map.u32_at(self.head));

        map.set_u32(self.head, index);
        map.set_u32(self.free_count, map.u32_at(self.free_count) + 1);
        if self.kind == AreaKind::Elements {
            map.set_u32(
                hdr::ELEMENT_COUNT,
                map.u32_at(hdr::ELEMENT_COUNT).saturating_sub(1),
            );
        }
        Ok(())
    }

    /// Thread `count` fresh, zeroed records starting at `first` onto the free list
    pub fn thread(&self, map: &Mapping, first: u32, count: u32) -> Result<()> {
        if count == 0 {
            return Ok(());
        }

        let mut next = map.u32_at(self.head);
        // Walk backwards so the list hands out ascending indices
        for index in (first..first + count).rev() {
            let off = map.record(self.kind, index)?;
            map.set_u32(off + self.link, next);
            next = index;
        }

        map.set_u32(self.head, first);
        map.set_u32(self.free_count, map.u32_at(self.free_count) + count);
        map.set_u32(self.capacity, map.u32_at(self.capacity) + count);
        Ok(())
    }

    pub fn handle(&self, map: &Mapping, index: u32) -> Result<Handle> {
        let off = map.record(self.kind, index)?;
        Ok(Handle {
            index,
            generation: map.u32_at(off + self.generation),
        })
    }

    /// True when `handle` still names the record it was taken from
    pub fn is_current(&self, map: &Mapping, handle: Handle) -> bool {
        match map.record(self.kind, handle.index) {
            Ok(off) => {
                map.u32_at(off + self.flags) & FLAG_LIVE != 0
                    && map.u32_at(off + self.generation) == handle.generation
            }
            Err(_) => false,
        }
    }

    pub fn capacity(&self, map: &Mapping) -> u32 {
        map.u32_at(self.capacity)
    }

    pub fn free(&self, map: &Mapping) -> u32 {
        map.u32_at(self.free_count)
    }
}

// =============================================================================
// Allocator
// =============================================================================

/// Pool access that takes the allocator lock around each free-list update
pub(crate) struct Allocator<'a> {
    map: &'a Mapping,
    lock: &'a SharedLock<()>,
}

impl<'a> Allocator<'a> {
    pub fn new(map: &'a Mapping, lock: &'a SharedLock<()>) -> Self {
        Self { map, lock }
    }

    pub fn map(&self) -> &'a Mapping {
        self.map
    }

    pub fn element(&self) -> Result<u32> {
        let _guard = self.lock.write()?;
        ELEMENTS.allocate(self.map)
    }

    pub fn release_element(&self, index: u32) -> Result<()> {
        let _guard = self.lock.write()?;
        ELEMENTS.release(self.map, index)
    }

    /// Take `count` pages, all or nothing
    pub fn pages(&self, count: usize) -> Result<Vec<u32>> {
        let mut taken = Vec::with_capacity(count);
        if count == 0 {
            return Ok(taken);
        }

        let _guard = self.lock.write()?;
        for _ in 0..count {
            match PAGES.allocate(self.map) {
                Ok(index) => taken.push(index),
                Err(e) => {
                    for &index in taken.iter().rev() {
                        PAGES.release(self.map, index)?;
                    }
                    return Err(e);
                }
            }
        }
        Ok(taken)
    }

    /// Stamp the header's last-modified time
    pub fn touch(&self, now: u64) {
        match self.lock.write() {
            Ok(_guard) => self.map.set_u64(hdr::LAST_MODIFIED, now),
            Err(e) => tracing::warn!(error = %e, "failed to stamp region modification time"),
        }
    }

    pub fn release_pages(&self, pages: &[u32]) -> Result<()> {
        if pages.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.write()?;
        for &index in pages {
            PAGES.release(self.map, index)?;
        }
        Ok(())
    }
}
