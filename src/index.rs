//! Extendible Hash Index
//!
//! Routes a key's primary hash to a collision slot without ever rehashing.
//!
//! ## Bucket Numbering
//! The bucket index is built one bit-depth at a time. Depth 0 holds one
//! entry (the empty prefix); depth `d >= 1` adds `2^(d-1)` entries, one per
//! odd `d`-bit prefix. A prefix ending in zero bits is the same prefix as
//! its shorter odd form, so it reuses that entry:
//!
//! ```text
//! depth 0:  [0] ""
//! depth 1:  [1] "1"
//! depth 2:  [2] "01"  [3] "11"
//! depth 3:  [4] "001" [5] "011" [6] "101" [7] "111"
//!
//! prefix "110" at depth 3 → "11" → entry 3
//! ```
//!
//! Growing from depth `D` to `D+1` appends entries `2^D..2^(D+1)` and never
//! touches existing ones.
//!
//! ## Routing
//! Each entry carries a routing depth `r` (encoded as the popcount of its
//! `shifted_mask`, minus the collision bits) and a slot group of
//! `2^collision_bits` slots. A hash lands in
//! `slot_group + bits[r, r + collision_bits)` of the hash, counted from the
//! top. New entries inherit the routing of the entry they extend, so growth
//! alone never moves an element. `split_bucket` gives one entry its own
//! group at the current depth and relinks only the nodes under its prefix.

use crate::error::{Result, ShmkvError};
use crate::region::layout::{bucket, hdr, slot, AreaKind, BUCKET_SIZE, SLOT_SIZE};
use crate::region::mapping::Mapping;
use crate::element;

/// Where a hash lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Route {
    /// Collision slot holding the element tree
    pub slot: u32,
    /// Routing depth of the entry
    pub depth: u32,
}

// =============================================================================
// Bit Helpers
// =============================================================================

/// Top `depth` bits of `hash`
pub(crate) fn prefix_of(hash: u32, depth: u32) -> u32 {
    if depth == 0 {
        0
    } else {
        hash >> (32 - depth)
    }
}

/// Bucket entry holding `prefix` at `depth`
pub(crate) fn entry_position(prefix: u32, depth: u32) -> u32 {
    if prefix == 0 {
        return 0;
    }
    let zeros = prefix.trailing_zeros();
    let odd = prefix >> zeros;
    let own_depth = depth - zeros;
    (1 << (own_depth - 1)) + (odd >> 1)
}

/// Mask with the top `bits` bits set
fn top_mask(bits: u32) -> u32 {
    ((1u64 << 32) - (1u64 << (32 - bits.min(32)))) as u32
}

/// Hash bits `[depth, depth + collision_bits)` from the top
pub(crate) fn collision_variant(hash: u32, depth: u32, collision_bits: u32) -> u32 {
    if collision_bits == 0 {
        return 0;
    }
    let shifted = ((hash as u64) << depth) & 0xFFFF_FFFF;
    (shifted >> (32 - collision_bits)) as u32
}

/// Number of entries allocated for an index at `depth`
pub(crate) fn entries_at(depth: u32) -> u32 {
    1 << depth
}

// =============================================================================
// Bucket Entries
// =============================================================================

struct Entry {
    assigned: bool,
    shifted_mask: u32,
    masked_hash: u32,
    slot_group: u32,
}

fn read_entry(map: &Mapping, index: u32) -> Result<Entry> {
    let off = map.record(AreaKind::Buckets, index)?;
    Ok(Entry {
        assigned: map.u32_at(off + bucket::ASSIGNED) != 0,
        shifted_mask: map.u32_at(off + bucket::SHIFTED_MASK),
        masked_hash: map.u32_at(off + bucket::MASKED_HASH),
        slot_group: map.u32_at(off + bucket::SLOT_GROUP),
    })
}

fn write_entry(map: &Mapping, index: u32, entry: &Entry) -> Result<()> {
    let off = map.record(AreaKind::Buckets, index)?;
    map.set_u32(off + bucket::ASSIGNED, entry.assigned as u32);
    map.set_u32(off + bucket::SHIFTED_MASK, entry.shifted_mask);
    map.set_u32(off + bucket::MASKED_HASH, entry.masked_hash);
    map.set_u32(off + bucket::SLOT_GROUP, entry.slot_group);
    Ok(())
}

fn routing_depth(entry: &Entry, collision_bits: u32) -> Result<u32> {
    entry
        .shifted_mask
        .count_ones()
        .checked_sub(collision_bits)
        .ok_or_else(|| ShmkvError::corrupt("bucket entry mask narrower than collision bits"))
}

/// Prefix of an entry at its own depth, aligned to the top of the hash
fn masked_prefix(prefix: u32, depth: u32) -> u32 {
    if depth == 0 {
        0
    } else {
        ((prefix as u64) << (32 - depth)) as u32
    }
}

// =============================================================================
// Creation
// =============================================================================

/// Populate every bucket entry from depth 0 up to `depth`
///
/// Each depth-`depth` prefix gets its own group of `2^collision_bits` slots.
/// Shallower entries are the same prefixes with trailing zeros removed, so
/// the index starts with one assigned entry per prefix and no sharing.
pub(crate) fn initialize_key_index_array(map: &Mapping, depth: u32, collision_bits: u32) -> Result<()> {
    let group_size = 1u32 << collision_bits;
    let shifted_mask = top_mask(depth + collision_bits);

    for d in 0..=depth {
        let odd_prefixes = if d == 0 { 1 } else { 1u32 << (d - 1) };
        for i in 0..odd_prefixes {
            let own = if d == 0 { 0 } else { (i << 1) | 1 };
            let full = if d == 0 { 0 } else { own << (depth - d) };
            let index = entry_position(full, depth);
            write_entry(
                map,
                index,
                &Entry {
                    assigned: true,
                    shifted_mask,
                    masked_hash: masked_prefix(own, d),
                    slot_group: full * group_size,
                },
            )?;
        }
    }

    map.set_u32(hdr::SLOTS_USED, entries_at(depth) * group_size);
    Ok(())
}

// =============================================================================
// Lookup
// =============================================================================

/// Resolve a primary hash to its collision slot
pub(crate) fn resolve(map: &Mapping, hash: u32) -> Result<Route> {
    let depth = map.u32_at(hdr::BIT_DEPTH);
    let collision_bits = map.u32_at(hdr::COLLISION_BITS);

    let entry_index = entry_position(prefix_of(hash, depth), depth);
    let entry = read_entry(map, entry_index)?;
    let r = routing_depth(&entry, collision_bits)?;

    Ok(Route {
        slot: entry.slot_group + collision_variant(hash, r, collision_bits),
        depth: r,
    })
}

/// Half-open range of hashes guaranteed to share `route`'s slot
///
/// All hashes agreeing on the top `max(routing depth, r + collision bits)`
/// bits route identically, where the routing depth is the deepest split so
/// far. Computed in u64 so the last unit can end at 2^32.
pub(crate) fn unit_of(map: &Mapping, hash: u32, route: &Route) -> (u64, u64) {
    let collision_bits = map.u32_at(hdr::COLLISION_BITS);
    let routing = map.u32_at(hdr::ROUTING_DEPTH);
    let bits = routing.max(route.depth + collision_bits).min(32);
    let size = 1u64 << (32 - bits);
    let start = hash as u64 & !(size - 1);
    (start, start + size)
}

/// Check that `hash`'s entry at the current depth agrees with its prefix
pub(crate) fn verify_entry(map: &Mapping, hash: u32) -> Result<bool> {
    let depth = map.u32_at(hdr::BIT_DEPTH);
    let entry = read_entry(map, entry_position(prefix_of(hash, depth), depth))?;
    Ok(hash & top_mask(depth) == entry.masked_hash)
}

// =============================================================================
// Growth
// =============================================================================

/// Grow the index to `new_depth`, appending the entries of every new depth
///
/// Caller holds the area-growth lock exclusively. Returns the number of
/// entries added.
pub(crate) fn grow_index(map: &mut Mapping, new_depth: u32) -> Result<u32> {
    let depth = map.u32_at(hdr::BIT_DEPTH);
    let max_depth = map.u32_at(hdr::MAX_BIT_DEPTH);

    if new_depth > max_depth {
        return Err(ShmkvError::param(format!(
            "bit depth {} exceeds the region maximum {}",
            new_depth, max_depth
        )));
    }
    if new_depth <= depth {
        return Ok(0);
    }

    // Step 1: make room for every new entry at once
    let needed = entries_at(new_depth);
    let capacity = map.u32_at(hdr::BUCKET_CAPACITY);
    if needed > capacity {
        map.append_area(AreaKind::Buckets, BUCKET_SIZE, capacity, needed - capacity)?;
        map.set_u32(hdr::BUCKET_CAPACITY, needed);
    }

    // Step 2: each new odd prefix inherits the routing of the prefix it extends
    for d in depth + 1..=new_depth {
        for i in 0..(1u32 << (d - 1)) {
            let own = (i << 1) | 1;
            let parent = read_entry(map, entry_position(own >> 1, d - 1))?;
            write_entry(
                map,
                (1 << (d - 1)) + i,
                &Entry {
                    assigned: false,
                    shifted_mask: parent.shifted_mask,
                    masked_hash: masked_prefix(own, d),
                    slot_group: parent.slot_group,
                },
            )?;
        }
    }

    // Step 3: publish the new depth
    map.set_u32(hdr::BIT_DEPTH, new_depth);
    Ok(needed - entries_at(depth))
}

/// Hand out a fresh group of collision slots, growing the slot area if needed
fn allocate_group(map: &mut Mapping) -> Result<u32> {
    let group_size = 1u32 << map.u32_at(hdr::COLLISION_BITS);
    let used = map.u32_at(hdr::SLOTS_USED);
    let capacity = map.u32_at(hdr::SLOT_CAPACITY);

    let end = used
        .checked_add(group_size)
        .ok_or(ShmkvError::PoolExhausted { pool: "collision slot" })?;

    if end > capacity {
        let grow = (capacity / 2).max(group_size * 16);
        let grow = grow - grow % group_size;
        let new_capacity = capacity
            .checked_add(grow)
            .ok_or(ShmkvError::PoolExhausted { pool: "collision slot" })?;
        map.append_area(AreaKind::Slots, SLOT_SIZE, capacity, grow)?;
        map.set_u32(hdr::SLOT_CAPACITY, new_capacity);
    }

    map.set_u32(hdr::SLOTS_USED, end);
    Ok(used)
}

/// Give the bucket entry routing `hash` at the current depth its own slot group
///
/// Caller holds the area-growth lock exclusively. Returns `false` when the
/// entry already routes at the current depth.
pub(crate) fn split_bucket(map: &mut Mapping, hash: u32) -> Result<bool> {
    let depth = map.u32_at(hdr::BIT_DEPTH);
    let collision_bits = map.u32_at(hdr::COLLISION_BITS);
    let prefix = prefix_of(hash, depth);
    let position = entry_position(prefix, depth);

    let entry = read_entry(map, position)?;
    let old_depth = routing_depth(&entry, collision_bits)?;
    if entry.assigned && old_depth == depth {
        return Ok(false);
    }

    // Step 1: take a fresh group before touching the entry
    let group = allocate_group(map)?;
    let old_group = entry.slot_group;

    write_entry(
        map,
        position,
        &Entry {
            assigned: true,
            shifted_mask: top_mask(depth + collision_bits),
            masked_hash: entry.masked_hash,
            slot_group: group,
        },
    )?;

    // Step 2: relink the nodes under this prefix into the new group
    let mut moved = 0u32;
    for variant in 0..(1u32 << collision_bits) {
        let from = old_group + variant;
        let mut nodes = Vec::new();
        element::collect(map, from, 0, 1u64 << 32, &mut nodes)?;
        for node in nodes {
            let node_hash = element::hash_of(map, node)?;
            if prefix_of(node_hash.hash, depth) != prefix {
                continue;
            }
            element::unlink(map, from, node)?;
            element::link(map, group + collision_variant(node_hash.hash, depth, collision_bits), node)?;
            moved += 1;
        }
    }

    let routing = map.u32_at(hdr::ROUTING_DEPTH);
    map.set_u32(hdr::ROUTING_DEPTH, routing.max(depth));

    tracing::info!(
        depth,
        prefix,
        entry = position,
        slot_group = group,
        moved,
        "split bucket entry"
    );
    Ok(true)
}

/// Sum of element counts over every slot in use
pub(crate) fn slot_element_total(map: &Mapping) -> Result<u64> {
    let used = map.u32_at(hdr::SLOTS_USED);
    let mut total = 0u64;
    for s in 0..used {
        let off = map.record(AreaKind::Slots, s)?;
        total += map.u32_at(off + slot::COUNT) as u64;
    }
    Ok(total)
}
