//! Range Sync Engine
//!
//! Incremental replication and partition rebalancing on top of the key
//! space.
//!
//! ## Scan
//! [`Store::scan_by_hash`] walks the collision slots in ascending primary
//! hash order and returns every element whose `hash mod modulus` falls in
//! a wrapped target interval, optionally filtered by modification time.
//! Results come in chunks; `next_hash` resumes the walk.
//!
//! ## Merge
//! [`Store::merge_element`] applies one serialized element with
//! last-writer-wins on the attribute-derived modification time. Losing is
//! a normal [`MergeOutcome::Skipped`], not an error.

use crate::attrs::Attributes;
use crate::codec::{encode_attrs, SerializedElement};
use crate::element;
use crate::error::{Result, ShmkvError};
use crate::index;
use crate::page::Blob;
use crate::region::arena::{Handle, ELEMENTS};
use crate::store::Store;

/// One past the largest primary hash
const HASH_SPACE: u64 = 1 << 32;

// =============================================================================
// Request Types
// =============================================================================

/// Wrapped interval `[start, start + span)` over `hash mod modulus`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashRange {
    pub start: u64,
    pub span: u64,
    pub modulus: u64,
}

impl HashRange {
    pub fn new(start: u64, span: u64, modulus: u64) -> Self {
        Self {
            start,
            span,
            modulus,
        }
    }

    /// Every hash
    pub fn all() -> Self {
        Self::new(0, HASH_SPACE, HASH_SPACE)
    }

    fn validate(&self, what: &str) -> Result<()> {
        if self.modulus == 0 {
            return Err(ShmkvError::param(format!("{} range has a zero modulus", what)));
        }
        Ok(())
    }

    /// Whether `hash` falls in the interval
    pub fn contains(&self, hash: u32) -> bool {
        if self.modulus == 0 {
            return false;
        }
        let m = self.modulus as u128;
        let distance = (hash as u128 % m + m - self.start as u128 % m) % m;
        distance < self.span as u128
    }
}

/// Half-open modification-time window `[start, end)` in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: u64,
    pub end: u64,
}

impl TimeWindow {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }
}

/// Parameters of one scan chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    /// First primary hash to visit
    pub start_hash: u32,

    /// Only elements modified inside this window (missing mtime counts as 0)
    pub window: Option<TimeWindow>,

    /// Elements whose hash falls here are returned
    pub target: HashRange,

    /// Range the caller already owned; only the window's end bound applies
    /// to elements in it
    pub old: Option<HashRange>,

    /// Skip expired elements and delete them after the scan
    pub check_expiry: bool,

    /// Stop after the hash unit that brings the chunk to this many elements
    pub max_elements: Option<usize>,
}

impl ScanRequest {
    pub fn new(target: HashRange) -> Self {
        Self {
            start_hash: 0,
            window: None,
            target,
            old: None,
            check_expiry: true,
            max_elements: None,
        }
    }

    pub fn start_hash(mut self, hash: u32) -> Self {
        self.start_hash = hash;
        self
    }

    pub fn window(mut self, start: u64, end: u64) -> Self {
        self.window = Some(TimeWindow::new(start, end));
        self
    }

    pub fn old_range(mut self, old: HashRange) -> Self {
        self.old = Some(old);
        self
    }

    pub fn check_expiry(mut self, check: bool) -> Self {
        self.check_expiry = check;
        self
    }

    pub fn max_elements(mut self, max: usize) -> Self {
        self.max_elements = Some(max);
        self
    }
}

/// One chunk of scan output
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub elements: Vec<SerializedElement>,

    /// Where the next chunk starts; `None` once the whole hash space is done
    pub next_hash: Option<u32>,

    /// Expired elements deleted by this scan
    pub reaped: usize,
}

/// Outcome of a merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The element replaced (or created) the local key
    Applied,

    /// The local key is at least as new, or the age of either side is unknown
    Skipped,
}

// =============================================================================
// Scan
// =============================================================================

impl Store {
    /// Scan one chunk of the hash space
    ///
    /// The walk proceeds in units of hashes that share a collision slot.
    /// Every unit is scanned whole, so resuming at `next_hash` neither
    /// repeats nor misses an element.
    pub fn scan_by_hash(&self, request: &ScanRequest) -> Result<ScanResult> {
        request.target.validate("target")?;
        if let Some(old) = &request.old {
            old.validate("old")?;
        }

        let mut result = ScanResult::default();
        let mut expired: Vec<(Handle, Vec<u8>)> = Vec::new();

        {
            let map = self.region().read()?;
            let keys = self.keys(&map);
            let mut cursor = request.start_hash as u64;

            while cursor < HASH_SPACE {
                let route = index::resolve(&map, cursor as u32)?;
                let (_, unit_end) = index::unit_of(&map, cursor as u32, &route);

                let _slot = self.region().slots().read(route.slot)?;
                if element::slot_count(&map, route.slot)? > 0 {
                    let mut nodes = Vec::new();
                    element::collect(&map, route.slot, cursor, unit_end, &mut nodes)?;

                    for node in nodes {
                        let key_hash = element::hash_of(&map, node)?;
                        if !request.target.contains(key_hash.hash) {
                            continue;
                        }

                        let attrs = keys.attrs_of(node)?;
                        if request.check_expiry && self.hook().is_expired(&attrs, keys.now) {
                            expired.push((ELEMENTS.handle(&map, node)?, keys.blob(node, Blob::Key)?));
                            continue;
                        }

                        if let Some(window) = &request.window {
                            let mtime = self.hook().modified_time(&attrs).unwrap_or(0);
                            let owned = request
                                .old
                                .as_ref()
                                .map_or(false, |old| old.contains(key_hash.hash));
                            if mtime >= window.end || (!owned && mtime < window.start) {
                                continue;
                            }
                        }

                        result.elements.push(SerializedElement::encode(
                            key_hash,
                            &keys.blob(node, Blob::Key)?,
                            &keys.blob(node, Blob::Value)?,
                            &keys.blob(node, Blob::Subkeys)?,
                            &keys.blob(node, Blob::Attrs)?,
                        ));
                    }
                }
                cursor = unit_end;
                let full = request
                    .max_elements
                    .map_or(false, |max| result.elements.len() >= max);
                if full && cursor < HASH_SPACE {
                    result.next_hash = Some(cursor as u32);
                    break;
                }
            }
        }

        // Expired elements are deleted once the read locks are gone
        for (handle, key) in expired {
            let reaped = self.write_keys(&[key.as_slice()], |keys| {
                let found = keys.lookup(&key)?;
                match found.node {
                    Some(node)
                        if node == handle.index
                            && ELEMENTS.is_current(keys.map, handle)
                            && keys.is_expired(node)? =>
                    {
                        keys.delete_node(found.slot, node)?;
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            })?;
            if reaped {
                result.reaped += 1;
            }
        }

        tracing::debug!(
            start_hash = request.start_hash,
            next_hash = ?result.next_hash,
            elements = result.elements.len(),
            reaped = result.reaped,
            "scanned hash range chunk"
        );
        Ok(result)
    }

    // =========================================================================
    // Merge
    // =========================================================================

    /// Apply a serialized element with last-writer-wins
    ///
    /// The incoming modification time is the element's own, or `as_of`
    /// when it carries none; in that case `as_of` is stamped into the
    /// stored attributes so merging the same element again is a no-op.
    ///
    /// | local key              | incoming time | outcome  |
    /// |------------------------|---------------|----------|
    /// | absent or expired      | any           | applied  |
    /// | has time `t`           | `> t`         | applied  |
    /// | has time `t`           | `<= t`/none   | skipped  |
    /// | has no time            | some          | applied  |
    /// | has no time            | none          | skipped  |
    ///
    /// An incoming element that is already expired is skipped.
    pub fn merge_element(&self, incoming: &SerializedElement, as_of: Option<u64>) -> Result<MergeOutcome> {
        // Step 1: validate everything before touching the region
        let key = incoming.key();
        let key_hash = self.hash(key);
        if key_hash != incoming.key_hash() {
            return Err(ShmkvError::corrupt(format!(
                "serialized element hashes {:?} but its key hashes {:?}",
                incoming.key_hash(),
                key_hash
            )));
        }
        incoming.subkeys()?;
        let mut attrs: Attributes = incoming.attrs()?;

        let hook = self.hook();
        let incoming_time = match hook.modified_time(&attrs) {
            Some(time) => Some(time),
            None => {
                if let Some(time) = as_of {
                    hook.stamp_modified(&mut attrs, time);
                }
                as_of
            }
        };
        let attrs_blob = encode_attrs(&attrs);

        // Step 2: decide and apply under the key's slot lock
        let outcome = self.write_keys(&[key], |keys| {
            if hook.is_expired(&attrs, keys.now) {
                return Ok(MergeOutcome::Skipped);
            }

            let found = keys.lookup_hashed(key, key_hash)?;
            if let Some(node) = found.node {
                if !keys.is_expired(node)? {
                    let newer = match (keys.modified_time(node)?, incoming_time) {
                        (_, None) => false,
                        (None, Some(_)) => true,
                        (Some(local), Some(remote)) => remote > local,
                    };
                    if !newer {
                        return Ok(MergeOutcome::Skipped);
                    }
                }
            }

            let blobs = [
                (Blob::Value, incoming.value()),
                (Blob::Subkeys, incoming.subkeys_blob()),
                (Blob::Attrs, attrs_blob.as_slice()),
            ];
            // In place, so a failed write leaves the local element untouched
            match found.node {
                Some(node) => keys.rewrite(node, &blobs, false)?,
                None => {
                    keys.insert(&found, key, &blobs)?;
                    keys.touch();
                }
            }
            Ok(MergeOutcome::Applied)
        })?;

        tracing::debug!(
            hash = key_hash.hash,
            outcome = ?outcome,
            "merged serialized element"
        );
        Ok(outcome)
    }
}
