//! Page Pool blob chains
//!
//! A blob is stored as a doubly linked chain of fixed-size pages. Each page
//! carries a 24-byte header and up to `page_size - 24` bytes of data.
//!
//! ## Page Format
//! ```text
//! ┌──────────┬──────────┬──────────┬─────────┬──────────┬──────┬──────────┐
//! │ prev (4) │ next (4) │ used (4) │ gen (4) │ flags (4)│ rsvd │ data ... │
//! └──────────┴──────────┴──────────┴─────────┴──────────┴──────┴──────────┘
//! ```
//!
//! An element node refers to each of its four blobs by first page and total
//! length. An empty blob has no pages and a null first page.

use crate::error::{Result, ShmkvError};
use crate::region::arena::Allocator;
use crate::region::layout::{hdr, node, page, AreaKind, PAGE_HEADER_SIZE};
use crate::region::mapping::Mapping;

/// The four blobs owned by an element node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Blob {
    Key = 0,
    Value = 1,
    Subkeys = 2,
    Attrs = 3,
}

/// First page and total length of one blob
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BlobRef {
    pub first_page: u32,
    pub len: u64,
}

fn ref_offset(node_off: usize, blob: Blob) -> usize {
    node_off + node::BLOBS + blob as usize * node::BLOB_REF_SIZE
}

pub(crate) fn blob_ref(map: &Mapping, node_off: usize, blob: Blob) -> BlobRef {
    let off = ref_offset(node_off, blob);
    BlobRef {
        first_page: map.u32_at(off + node::BLOB_FIRST_PAGE),
        len: map.u64_at(off + node::BLOB_LEN),
    }
}

fn set_blob_ref(map: &Mapping, node_off: usize, blob: Blob, blob_ref: BlobRef) {
    let off = ref_offset(node_off, blob);
    map.set_u32(off + node::BLOB_FIRST_PAGE, blob_ref.first_page);
    map.set_u64(off + node::BLOB_LEN, blob_ref.len);
}

/// Data bytes per page
pub(crate) fn page_capacity(map: &Mapping) -> usize {
    (map.u32_at(hdr::PAGE_SIZE) - PAGE_HEADER_SIZE) as usize
}

fn pages_for(len: usize, capacity: usize) -> usize {
    (len + capacity - 1) / capacity
}

// =============================================================================
// Reading
// =============================================================================

/// Page indices of a chain, checked against the blob length
fn chain(map: &Mapping, blob_ref: BlobRef) -> Result<Vec<u32>> {
    let capacity = page_capacity(map) as u64;
    let expected = blob_ref.len / capacity + u64::from(blob_ref.len % capacity != 0);
    let mut pages = Vec::new();
    let mut total = 0u64;
    let mut current = blob_ref.first_page;
    let mut prev = 0u32;

    while current != 0 {
        if pages.len() as u64 >= expected {
            return Err(ShmkvError::corrupt(format!(
                "page chain longer than {} pages for a {}-byte blob",
                expected, blob_ref.len
            )));
        }
        let off = map.record(AreaKind::Pages, current)?;
        if map.u32_at(off + page::PREV) != prev {
            return Err(ShmkvError::corrupt(format!("page {} has a broken back link", current)));
        }
        let used = map.u32_at(off + page::USED) as u64;
        let next = map.u32_at(off + page::NEXT);
        if used == 0 || used > capacity || (used < capacity && next != 0) {
            return Err(ShmkvError::corrupt(format!(
                "page {} claims {} used bytes of {}",
                current, used, capacity
            )));
        }
        total += used;
        pages.push(current);
        prev = current;
        current = next;
    }

    if total != blob_ref.len {
        return Err(ShmkvError::corrupt(format!(
            "blob length {} but its pages hold {} bytes",
            blob_ref.len, total
        )));
    }
    Ok(pages)
}

/// Read a whole blob
pub(crate) fn read_blob(map: &Mapping, blob_ref: BlobRef) -> Result<Vec<u8>> {
    let pages = chain(map, blob_ref)?;
    let mut out = vec![0u8; blob_ref.len as usize];
    let mut pos = 0;
    for index in pages {
        let off = map.record(AreaKind::Pages, index)?;
        let used = map.u32_at(off + page::USED) as usize;
        map.read_bytes(off + page::DATA, &mut out[pos..pos + used]);
        pos += used;
    }
    Ok(out)
}

/// Compare a blob against `bytes` without copying it out
pub(crate) fn blob_eq(map: &Mapping, blob_ref: BlobRef, bytes: &[u8]) -> Result<bool> {
    if blob_ref.len != bytes.len() as u64 {
        return Ok(false);
    }

    let mut buf = vec![0u8; page_capacity(map)];
    let mut pos = 0;
    for index in chain(map, blob_ref)? {
        let off = map.record(AreaKind::Pages, index)?;
        let used = map.u32_at(off + page::USED) as usize;
        map.read_bytes(off + page::DATA, &mut buf[..used]);
        if buf[..used] != bytes[pos..pos + used] {
            return Ok(false);
        }
        pos += used;
    }
    Ok(true)
}

// =============================================================================
// Writing
// =============================================================================

/// Replace several blobs of one node as a unit
///
/// Every extra page the new contents need is taken up front. If the pool
/// cannot supply them, nothing is written and the old blobs stay intact.
/// Existing pages are reused first; surplus pages go back to the pool.
pub(crate) fn write_blobs(alloc: &Allocator<'_>, node_off: usize, blobs: &[(Blob, &[u8])]) -> Result<()> {
    let map = alloc.map();
    let capacity = page_capacity(map);

    // Step 1: work out how many pages each blob gains
    let mut chains = Vec::with_capacity(blobs.len());
    let mut extra = 0usize;
    for &(blob, data) in blobs {
        let existing = chain(map, blob_ref(map, node_off, blob))?;
        let needed = pages_for(data.len(), capacity);
        extra += needed.saturating_sub(existing.len());
        chains.push(existing);
    }

    // Step 2: reserve them all at once
    let mut fresh = alloc.pages(extra)?.into_iter();

    // Step 3: write in place, then release what is left over
    for (&(blob, data), existing) in blobs.iter().zip(chains) {
        let needed = pages_for(data.len(), capacity);
        let mut pages = existing;
        let surplus = if pages.len() > needed {
            pages.split_off(needed)
        } else {
            Vec::new()
        };
        while pages.len() < needed {
            match fresh.next() {
                Some(index) => pages.push(index),
                None => return Err(ShmkvError::corrupt("page reservation came up short")),
            }
        }

        fill_chain(map, &pages, data)?;
        set_blob_ref(
            map,
            node_off,
            blob,
            BlobRef {
                first_page: pages.first().copied().unwrap_or(0),
                len: data.len() as u64,
            },
        );
        alloc.release_pages(&surplus)?;
    }
    Ok(())
}

/// Replace one blob
pub(crate) fn write_blob(alloc: &Allocator<'_>, node_off: usize, blob: Blob, data: &[u8]) -> Result<()> {
    write_blobs(alloc, node_off, &[(blob, data)])
}

fn fill_chain(map: &Mapping, pages: &[u32], data: &[u8]) -> Result<()> {
    let capacity = page_capacity(map);
    for (i, (&index, piece)) in pages.iter().zip(data.chunks(capacity)).enumerate() {
        let off = map.record(AreaKind::Pages, index)?;
        let prev = if i == 0 { 0 } else { pages[i - 1] };
        let next = pages.get(i + 1).copied().unwrap_or(0);
        map.set_u32(off + page::PREV, prev);
        map.set_u32(off + page::NEXT, next);
        map.set_u32(off + page::USED, piece.len() as u32);
        map.write_bytes(off + page::DATA, piece);
    }
    Ok(())
}

/// Release every page of every blob of a node
pub(crate) fn free_blobs(alloc: &Allocator<'_>, node_off: usize) -> Result<()> {
    let map = alloc.map();
    for blob in [Blob::Key, Blob::Value, Blob::Subkeys, Blob::Attrs] {
        let pages = chain(map, blob_ref(map, node_off, blob))?;
        alloc.release_pages(&pages)?;
        set_blob_ref(map, node_off, blob, BlobRef::default());
    }
    Ok(())
}
