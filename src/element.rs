//! Element Store
//!
//! Each collision slot roots a binary search tree of element nodes ordered
//! by `(hash, subhash)` through their `big`/`small` links. Nodes with an
//! identical pair hang off the tree node on a `same` chain and are told
//! apart only by comparing key bytes.
//!
//! ```text
//!              [h=40]──same──[h=40]──same──[h=40]
//!             /      \
//!        small        big
//!         /              \
//!     [h=12]            [h=93]
//! ```
//!
//! Every function here expects the caller to hold the lock of the slot it
//! touches (or the growth lock exclusively).

use std::cmp::Ordering;

use crate::error::{Result, ShmkvError};
use crate::hash::KeyHash;
use crate::page::{self, Blob};
use crate::region::arena::ELEMENTS;
use crate::region::layout::{node, slot, AreaKind};
use crate::region::mapping::Mapping;

/// A location holding a node index
#[derive(Debug, Clone, Copy)]
enum Link {
    Root(u32),
    Field(u32, usize),
}

impl Link {
    fn get(self, map: &Mapping) -> Result<u32> {
        Ok(match self {
            Link::Root(s) => map.u32_at(map.record(AreaKind::Slots, s)? + slot::ROOT),
            Link::Field(n, field) => map.u32_at(node_off(map, n)? + field),
        })
    }

    fn set(self, map: &Mapping, value: u32) -> Result<()> {
        match self {
            Link::Root(s) => map.set_u32(map.record(AreaKind::Slots, s)? + slot::ROOT, value),
            Link::Field(n, field) => map.set_u32(node_off(map, n)? + field, value),
        }
        Ok(())
    }
}

// =============================================================================
// Node Accessors
// =============================================================================

pub(crate) fn node_off(map: &Mapping, index: u32) -> Result<usize> {
    if index == 0 {
        return Err(ShmkvError::corrupt("null element reference"));
    }
    map.record(AreaKind::Elements, index)
}

pub(crate) fn hash_of(map: &Mapping, index: u32) -> Result<KeyHash> {
    let off = node_off(map, index)?;
    Ok(KeyHash::new(
        map.u32_at(off + node::HASH),
        map.u32_at(off + node::SUBHASH),
    ))
}

pub(crate) fn set_hash(map: &Mapping, index: u32, key_hash: KeyHash) -> Result<()> {
    let off = node_off(map, index)?;
    map.set_u32(off + node::HASH, key_hash.hash);
    map.set_u32(off + node::SUBHASH, key_hash.subhash);
    Ok(())
}

fn field(map: &Mapping, index: u32, field: usize) -> Result<u32> {
    Ok(map.u32_at(node_off(map, index)? + field))
}

/// Number of elements linked under a slot
pub(crate) fn slot_count(map: &Mapping, s: u32) -> Result<u32> {
    Ok(map.u32_at(map.record(AreaKind::Slots, s)? + slot::COUNT))
}

fn adjust_count(map: &Mapping, s: u32, grow: bool) -> Result<()> {
    let off = map.record(AreaKind::Slots, s)? + slot::COUNT;
    let count = map.u32_at(off);
    let count = if grow {
        count + 1
    } else {
        count
            .checked_sub(1)
            .ok_or_else(|| ShmkvError::corrupt(format!("slot {} count underflow", s)))?
    };
    map.set_u32(off, count);
    Ok(())
}

/// Bound on walk steps; more than this means a cycle
fn step_limit(map: &Mapping) -> u64 {
    ELEMENTS.capacity(map) as u64 + 1
}

fn cycle_error(s: u32) -> ShmkvError {
    ShmkvError::corrupt(format!("element tree under slot {} has a cycle", s))
}

// =============================================================================
// Lookup
// =============================================================================

/// Find the node whose key is exactly `key`
pub(crate) fn find(map: &Mapping, s: u32, key_hash: KeyHash, key: &[u8]) -> Result<Option<u32>> {
    let limit = step_limit(map);
    let mut steps = 0u64;
    let mut current = Link::Root(s).get(map)?;

    while current != 0 {
        steps += 1;
        if steps > limit {
            return Err(cycle_error(s));
        }

        match key_hash.cmp(&hash_of(map, current)?) {
            Ordering::Less => current = field(map, current, node::SMALL)?,
            Ordering::Greater => current = field(map, current, node::BIG)?,
            Ordering::Equal => {
                while current != 0 {
                    steps += 1;
                    if steps > limit {
                        return Err(cycle_error(s));
                    }
                    let key_ref = page::blob_ref(map, node_off(map, current)?, Blob::Key);
                    if page::blob_eq(map, key_ref, key)? {
                        return Ok(Some(current));
                    }
                    current = field(map, current, node::SAME)?;
                }
                return Ok(None);
            }
        }
    }
    Ok(None)
}

// =============================================================================
// Linking
// =============================================================================

/// Link a filled-in node into a slot's tree
///
/// The caller has already checked that no node with the same key exists.
/// A node whose `(hash, subhash)` is already present goes to the end of
/// that pair's `same` chain.
pub(crate) fn link(map: &Mapping, s: u32, index: u32) -> Result<()> {
    let off = node_off(map, index)?;
    map.set_u32(off + node::BIG, 0);
    map.set_u32(off + node::SMALL, 0);
    map.set_u32(off + node::SAME, 0);

    let key_hash = hash_of(map, index)?;
    let limit = step_limit(map);
    let mut steps = 0u64;
    let mut location = Link::Root(s);

    loop {
        steps += 1;
        if steps > limit {
            return Err(cycle_error(s));
        }

        let current = location.get(map)?;
        if current == 0 {
            location.set(map, index)?;
            break;
        }
        location = match key_hash.cmp(&hash_of(map, current)?) {
            Ordering::Less => Link::Field(current, node::SMALL),
            Ordering::Greater => Link::Field(current, node::BIG),
            Ordering::Equal => Link::Field(current, node::SAME),
        };
    }

    adjust_count(map, s, true)
}

/// Unlink a node from a slot's tree, repairing links around it
///
/// The node itself is left allocated with its links cleared.
pub(crate) fn unlink(map: &Mapping, s: u32, index: u32) -> Result<()> {
    let key_hash = hash_of(map, index)?;
    let limit = step_limit(map);
    let mut steps = 0u64;

    // Step 1: find the link pointing at the tree node for this pair
    let mut location = Link::Root(s);
    let head = loop {
        steps += 1;
        if steps > limit {
            return Err(cycle_error(s));
        }
        let current = location.get(map)?;
        if current == 0 {
            return Err(ShmkvError::corrupt(format!(
                "element {} is not linked under slot {}",
                index, s
            )));
        }
        match key_hash.cmp(&hash_of(map, current)?) {
            Ordering::Less => location = Link::Field(current, node::SMALL),
            Ordering::Greater => location = Link::Field(current, node::BIG),
            Ordering::Equal => break current,
        }
    };

    let same = field(map, index, node::SAME)?;

    if head != index {
        // Step 2a: a chain member further down simply gets skipped
        let mut chain = Link::Field(head, node::SAME);
        loop {
            steps += 1;
            if steps > limit {
                return Err(cycle_error(s));
            }
            let current = chain.get(map)?;
            if current == 0 {
                return Err(ShmkvError::corrupt(format!(
                    "element {} missing from its same chain under slot {}",
                    index, s
                )));
            }
            if current == index {
                chain.set(map, same)?;
                break;
            }
            chain = Link::Field(current, node::SAME);
        }
    } else {
        let big = field(map, index, node::BIG)?;
        let small = field(map, index, node::SMALL)?;

        if same != 0 {
            // Step 2b: the next chain member takes the head's place in the tree
            let off = node_off(map, same)?;
            map.set_u32(off + node::BIG, big);
            map.set_u32(off + node::SMALL, small);
            location.set(map, same)?;
        } else if small == 0 {
            location.set(map, big)?;
        } else if big == 0 {
            location.set(map, small)?;
        } else {
            // Step 2c: replace with the smallest node of the big subtree
            let mut parent = Link::Field(index, node::BIG);
            let mut successor = big;
            loop {
                let next = field(map, successor, node::SMALL)?;
                if next == 0 {
                    break;
                }
                steps += 1;
                if steps > limit {
                    return Err(cycle_error(s));
                }
                parent = Link::Field(successor, node::SMALL);
                successor = next;
            }
            parent.set(map, field(map, successor, node::BIG)?)?;

            let off = node_off(map, successor)?;
            map.set_u32(off + node::SMALL, small);
            map.set_u32(off + node::BIG, field(map, index, node::BIG)?);
            location.set(map, successor)?;
        }
    }

    let off = node_off(map, index)?;
    map.set_u32(off + node::BIG, 0);
    map.set_u32(off + node::SMALL, 0);
    map.set_u32(off + node::SAME, 0);
    adjust_count(map, s, false)
}

// =============================================================================
// Traversal
// =============================================================================

/// Collect, in `(hash, subhash)` order, every node under a slot whose hash
/// falls in `[lo, hi)`
pub(crate) fn collect(map: &Mapping, s: u32, lo: u64, hi: u64, out: &mut Vec<u32>) -> Result<()> {
    let limit = step_limit(map);
    let mut steps = 0u64;
    let mut stack = Vec::new();
    let mut current = Link::Root(s).get(map)?;

    loop {
        while current != 0 {
            steps += 1;
            if steps > limit {
                return Err(cycle_error(s));
            }
            stack.push(current);
            current = if hash_of(map, current)?.hash as u64 >= lo {
                field(map, current, node::SMALL)?
            } else {
                0
            };
        }

        let Some(index) = stack.pop() else {
            break;
        };
        let hash = hash_of(map, index)?.hash as u64;

        if hash >= lo && hash < hi {
            let mut member = index;
            while member != 0 {
                steps += 1;
                if steps > limit {
                    return Err(cycle_error(s));
                }
                out.push(member);
                member = field(map, member, node::SAME)?;
            }
        }

        current = if hash < hi {
            field(map, index, node::BIG)?
        } else {
            0
        };
    }
    Ok(())
}
