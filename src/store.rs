//! Store
//!
//! The public handle on an attached region.
//!
//! ## Responsibilities
//! - Create or attach the region and its process-local locks
//! - Key operations: value, subkeys and attributes of each key
//! - Explicit region growth (index depth, bucket split, pool sizes)
//! - Statistics and consistency checks
//!
//! ## Lock Order
//! ```text
//! area-growth lock (shared for key ops, exclusive for growth)
//!   → collision-slot stripes (ascending when several keys are involved)
//!     → allocator lock (only around free-list updates)
//! ```

use crate::attrs::{now_millis, AttributeHook, Attributes, StandardAttributes};
use crate::codec::{decode_attrs, decode_subkeys, encode_attrs, encode_subkeys};
use crate::config::Config;
use crate::element;
use crate::error::{Result, ShmkvError};
use crate::hash::{HashFn, KeyHash};
use crate::index;
use crate::page::{self, Blob};
use crate::region::arena::{Allocator, ELEMENTS, PAGES};
use crate::region::layout::{hdr, AreaKind, BUCKET_SIZE, ELEMENT_SIZE, SLOT_SIZE};
use crate::region::mapping::{InitialLayout, Mapping};
use crate::region::Region;

/// An attached key/value region
pub struct Store {
    /// Options the store was opened with (geometry comes from the header
    /// when attaching)
    config: Config,

    /// The mapping plus this process's locks on it
    region: Region,

    /// Attribute policy (expiry, modification time)
    hook: Box<dyn AttributeHook>,
}

/// Point-in-time snapshot of region counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionStats {
    pub bit_depth: u32,
    pub min_bit_depth: u32,
    pub max_bit_depth: u32,
    /// Deepest routing depth created by a split
    pub routing_depth: u32,
    pub collision_bits: u32,
    pub page_size: u32,
    pub bucket_entries: u32,
    pub slots_used: u32,
    pub slot_capacity: u32,
    pub elements: u32,
    pub element_capacity: u32,
    pub free_elements: u32,
    pub page_capacity: u32,
    pub free_pages: u32,
    pub areas: u32,
    pub region_len: u64,
    pub last_modified: u64,
    pub last_grown: u64,
    pub file_backed: bool,
    pub hash_name: String,
}

impl Store {
    // =========================================================================
    // Open / Attach
    // =========================================================================

    /// Open a store with the standard attribute policy
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with_hook(config, StandardAttributes)
    }

    /// Open a store with a caller-supplied attribute policy
    ///
    /// Creates, attaches or does either depending on `config.open_mode`.
    /// A new region is fully initialized before it becomes visible under
    /// its final name.
    pub fn open_with_hook<H>(config: Config, hook: H) -> Result<Self>
    where
        H: AttributeHook + 'static,
    {
        // Step 1: reject bad options before touching any file
        config.validate()?;

        // Step 2: size the initial areas (record 0 of each pool is the null index)
        let group_size = 1u32 << config.collision_bits;
        let entries = index::entries_at(config.bit_depth);
        let layout = InitialLayout {
            hash_name: config.hash_fn.name(),
            bit_depth: config.bit_depth,
            max_bit_depth: config.max_bit_depth,
            collision_bits: config.collision_bits,
            page_size: config.page_size,
            lock_stripes: config.lock_stripes,
            buckets: (entries, BUCKET_SIZE),
            slots: (entries * group_size, SLOT_SIZE),
            elements: (config.element_capacity + 1, ELEMENT_SIZE),
            pages: (config.page_capacity + 1, config.page_size),
        };

        // Step 3: create or attach
        let (bit_depth, collision_bits) = (config.bit_depth, config.collision_bits);
        let (element_capacity, page_capacity) = (config.element_capacity, config.page_capacity);
        let region = Region::open(&config, &layout, |map| {
            index::initialize_key_index_array(map, bit_depth, collision_bits)?;
            ELEMENTS.thread(map, 1, element_capacity)?;
            PAGES.thread(map, 1, page_capacity)
        })?;

        Ok(Self {
            config,
            region,
            hook: Box::new(hook),
        })
    }

    /// Options the store was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Hash a key with this store's hash implementation
    pub fn hash(&self, key: &[u8]) -> KeyHash {
        self.config.hash_fn.hash(key)
    }

    pub(crate) fn hook(&self) -> &dyn AttributeHook {
        self.hook.as_ref()
    }

    pub(crate) fn region(&self) -> &Region {
        &self.region
    }

    // =========================================================================
    // Locked Access
    // =========================================================================

    /// Run `f` with read locks on the slot holding `key`
    pub(crate) fn read_key<T, F>(&self, key: &[u8], f: F) -> Result<T>
    where
        F: FnOnce(&Keys<'_>) -> Result<T>,
    {
        check_key(key)?;
        let map = self.region.read()?;
        let route = index::resolve(&map, self.hash(key).hash)?;
        let _slot = self.region.slots().read(route.slot)?;
        f(&self.keys(&map))
    }

    /// Run `f` with write locks on the slots holding every key in `keys`
    pub(crate) fn write_keys<T, F>(&self, keys: &[&[u8]], f: F) -> Result<T>
    where
        F: FnOnce(&Keys<'_>) -> Result<T>,
    {
        for key in keys {
            check_key(key)?;
        }
        let map = self.region.read()?;
        let slots = keys
            .iter()
            .map(|key| index::resolve(&map, self.hash(key).hash).map(|route| route.slot))
            .collect::<Result<Vec<_>>>()?;
        let _slots = self.region.slots().write_many(&slots)?;
        f(&self.keys(&map))
    }

    pub(crate) fn keys<'a>(&'a self, map: &'a Mapping) -> Keys<'a> {
        Keys {
            map,
            alloc: self.region.allocator(map),
            hash_fn: self.config.hash_fn,
            hook: self.hook.as_ref(),
            now: now_millis(),
        }
    }

    // =========================================================================
    // Values
    // =========================================================================

    /// Store `value` under `key`, creating the key if needed
    ///
    /// On failure the previous value (if any) is left intact.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_keys(&[key], |keys| {
            keys.write(key, &[(Blob::Value, value)], true)?;
            Ok(())
        })
    }

    /// Value of `key`; `None` when absent or expired
    ///
    /// A key that exists without a value yields an empty vector.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.read_key(key, |keys| match keys.live(key)? {
            Some(node) => keys.blob(node, Blob::Value).map(Some),
            None => Ok(None),
        })
    }

    /// Whether `key` exists and is not expired
    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        self.read_key(key, |keys| Ok(keys.live(key)?.is_some()))
    }

    /// Remove `key` with all of its blobs; returns whether it existed
    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        self.write_keys(&[key], |keys| keys.delete(key))
    }

    /// Drop the value of `key`, keeping the key while it still has subkeys
    ///
    /// Returns whether the key existed.
    pub fn remove_value(&self, key: &[u8]) -> Result<bool> {
        self.write_keys(&[key], |keys| {
            let found = keys.lookup(key)?;
            let Some(node) = found.node else {
                return Ok(false);
            };
            if keys.blob_len(node, Blob::Subkeys)? == 0 {
                keys.delete_node(found.slot, node)?;
            } else {
                keys.write(key, &[(Blob::Value, &[][..])], true)?;
            }
            Ok(true)
        })
    }

    /// Number of keys in the region (expired keys included until reaped)
    pub fn len(&self) -> Result<u64> {
        let map = self.region.read()?;
        Ok(map.u32_at(hdr::ELEMENT_COUNT) as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    // =========================================================================
    // Subkeys
    // =========================================================================

    /// Replace the subkey list of `key`, creating the key if needed
    pub fn set_subkeys(&self, key: &[u8], subkeys: &[Vec<u8>]) -> Result<()> {
        let encoded = encode_subkeys(subkeys);
        self.write_keys(&[key], |keys| {
            keys.write(key, &[(Blob::Subkeys, encoded.as_slice())], true)?;
            Ok(())
        })
    }

    /// Subkeys of `key`; `None` when the key is absent or expired
    pub fn subkeys(&self, key: &[u8]) -> Result<Option<Vec<Vec<u8>>>> {
        self.read_key(key, |keys| match keys.live(key)? {
            Some(node) => keys.subkeys_of(node).map(Some),
            None => Ok(None),
        })
    }

    /// Append `subkey` to the list of `key` unless already present
    pub fn add_subkey(&self, key: &[u8], subkey: &[u8]) -> Result<bool> {
        check_key(subkey)?;
        self.write_keys(&[key], |keys| {
            let mut list = match keys.live(key)? {
                Some(node) => keys.subkeys_of(node)?,
                None => Vec::new(),
            };
            if list.iter().any(|s| s == subkey) {
                return Ok(false);
            }
            list.push(subkey.to_vec());
            let encoded = encode_subkeys(&list);
            keys.write(key, &[(Blob::Subkeys, encoded.as_slice())], true)?;
            Ok(true)
        })
    }

    /// Remove `subkey` from the list of `key`; returns whether it was listed
    pub fn remove_subkey(&self, key: &[u8], subkey: &[u8]) -> Result<bool> {
        self.write_keys(&[key], |keys| {
            let Some(node) = keys.live(key)? else {
                return Ok(false);
            };
            let mut list = keys.subkeys_of(node)?;
            let before = list.len();
            list.retain(|s| s != subkey);
            if list.len() == before {
                return Ok(false);
            }
            let encoded = encode_subkeys(&list);
            keys.write(key, &[(Blob::Subkeys, encoded.as_slice())], true)?;
            Ok(true)
        })
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    /// Attributes of `key`; `None` when absent or expired
    pub fn attrs(&self, key: &[u8]) -> Result<Option<Attributes>> {
        self.read_key(key, |keys| match keys.live(key)? {
            Some(node) => keys.attrs_of(node).map(Some),
            None => Ok(None),
        })
    }

    /// One attribute of `key`
    pub fn attr(&self, key: &[u8], name: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .attrs(key)?
            .and_then(|attrs| attrs.get(name).map(|v| v.to_vec())))
    }

    /// Replace every attribute of an existing key; returns whether it exists
    ///
    /// The attribute policy is not consulted, so this can also clear or
    /// back-date the modification time.
    pub fn set_attrs(&self, key: &[u8], attrs: &Attributes) -> Result<bool> {
        let encoded = encode_attrs(attrs);
        self.write_keys(&[key], |keys| {
            let Some(node) = keys.lookup(key)?.node else {
                return Ok(false);
            };
            page::write_blob(&keys.alloc, element::node_off(keys.map, node)?, Blob::Attrs, &encoded)?;
            keys.touch();
            Ok(true)
        })
    }

    /// Set one attribute of an existing key; returns whether it exists
    pub fn set_attr(&self, key: &[u8], name: &[u8], value: &[u8]) -> Result<bool> {
        if name.is_empty() {
            return Err(ShmkvError::param("attribute name is empty"));
        }
        self.update_attrs(key, |attrs| {
            attrs.set(name, value);
            true
        })
    }

    /// Remove one attribute; returns whether it was present
    pub fn remove_attr(&self, key: &[u8], name: &[u8]) -> Result<bool> {
        self.update_attrs(key, |attrs| attrs.remove(name).is_some())
    }

    fn update_attrs<F>(&self, key: &[u8], f: F) -> Result<bool>
    where
        F: FnOnce(&mut Attributes) -> bool,
    {
        self.write_keys(&[key], |keys| {
            let Some(node) = keys.lookup(key)?.node else {
                return Ok(false);
            };
            let mut attrs = keys.attrs_of(node)?;
            if !f(&mut attrs) {
                return Ok(false);
            }
            let off = element::node_off(keys.map, node)?;
            page::write_blob(&keys.alloc, off, Blob::Attrs, &encode_attrs(&attrs))?;
            keys.touch();
            Ok(true)
        })
    }

    // =========================================================================
    // Region Growth
    // =========================================================================

    /// Grow the bucket index to `depth` bits; returns the entries added
    pub fn grow_index(&self, depth: u32) -> Result<u32> {
        let mut map = self.region.write()?;
        let from = map.u32_at(hdr::BIT_DEPTH);
        let added = index::grow_index(&mut map, depth)?;
        if added > 0 {
            tracing::info!(from, to = depth, added, "grew bucket index");
        }
        Ok(added)
    }

    /// Give the bucket entry routing `hash` its own collision slots
    ///
    /// Nodes under that prefix are relinked into the new slots; no blob is
    /// copied. Returns `false` when the entry already routes at the current
    /// depth.
    pub fn split_bucket(&self, hash: u32) -> Result<bool> {
        let mut map = self.region.write()?;
        index::split_bucket(&mut map, hash)
    }

    /// Append `count` element nodes to the element pool
    pub fn grow_elements(&self, count: u32) -> Result<()> {
        let mut map = self.region.write()?;
        grow_pool(&mut map, AreaKind::Elements, ELEMENT_SIZE, count)
    }

    /// Append `count` pages to the page pool
    pub fn grow_pages(&self, count: u32) -> Result<()> {
        let mut map = self.region.write()?;
        let page_size = map.u32_at(hdr::PAGE_SIZE);
        grow_pool(&mut map, AreaKind::Pages, page_size, count)
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn stats(&self) -> Result<RegionStats> {
        let map = self.region.read()?;
        Ok(RegionStats {
            bit_depth: map.u32_at(hdr::BIT_DEPTH),
            min_bit_depth: map.u32_at(hdr::MIN_BIT_DEPTH),
            max_bit_depth: map.u32_at(hdr::MAX_BIT_DEPTH),
            routing_depth: map.u32_at(hdr::ROUTING_DEPTH),
            collision_bits: map.u32_at(hdr::COLLISION_BITS),
            page_size: map.u32_at(hdr::PAGE_SIZE),
            bucket_entries: index::entries_at(map.u32_at(hdr::BIT_DEPTH)),
            slots_used: map.u32_at(hdr::SLOTS_USED),
            slot_capacity: map.u32_at(hdr::SLOT_CAPACITY),
            elements: map.u32_at(hdr::ELEMENT_COUNT),
            element_capacity: ELEMENTS.capacity(&map),
            free_elements: ELEMENTS.free(&map),
            page_capacity: PAGES.capacity(&map),
            free_pages: PAGES.free(&map),
            areas: map.u32_at(hdr::AREA_COUNT),
            region_len: map.u64_at(hdr::REGION_LEN),
            last_modified: map.u64_at(hdr::LAST_MODIFIED),
            last_grown: map.u64_at(hdr::LAST_GROWN),
            file_backed: map.is_file_backed(),
            hash_name: map.hash_name(),
        })
    }

    /// Walk every collision slot and check the index against the elements
    ///
    /// Holds the growth lock exclusively, so the region is quiescent while
    /// it runs.
    pub fn verify(&self) -> Result<()> {
        let map = self.region.write()?;
        let used = map.u32_at(hdr::SLOTS_USED);

        for s in 0..used {
            let mut nodes = Vec::new();
            element::collect(&map, s, 0, 1u64 << 32, &mut nodes)?;
            if nodes.len() as u32 != element::slot_count(&map, s)? {
                return Err(ShmkvError::corrupt(format!(
                    "slot {} counts {} elements but links {}",
                    s,
                    element::slot_count(&map, s)?,
                    nodes.len()
                )));
            }
            for node in nodes {
                let hash = element::hash_of(&map, node)?.hash;
                if index::resolve(&map, hash)?.slot != s {
                    return Err(ShmkvError::corrupt(format!(
                        "element {} with hash {:#010x} sits in slot {} but routes elsewhere",
                        node, hash, s
                    )));
                }
                if !index::verify_entry(&map, hash)? {
                    return Err(ShmkvError::corrupt(format!(
                        "bucket entry for hash {:#010x} has a mismatched prefix",
                        hash
                    )));
                }
            }
        }

        let total = index::slot_element_total(&map)?;
        let counted = map.u32_at(hdr::ELEMENT_COUNT) as u64;
        if total != counted {
            return Err(ShmkvError::corrupt(format!(
                "header counts {} elements but slots hold {}",
                counted, total
            )));
        }
        Ok(())
    }

    /// Flush a file-backed region to disk
    pub fn flush(&self) -> Result<()> {
        let map = self.region.read()?;
        map.flush()
    }
}

fn grow_pool(map: &mut Mapping, kind: AreaKind, record_size: u32, count: u32) -> Result<()> {
    if count == 0 {
        return Err(ShmkvError::param("pool growth of zero records"));
    }
    let pool = match kind {
        AreaKind::Elements => &ELEMENTS,
        _ => &PAGES,
    };

    let first = pool.capacity(map) + 1;
    first
        .checked_add(count)
        .ok_or_else(|| ShmkvError::param(format!("{} pool cannot exceed u32 records", kind.name())))?;

    map.append_area(kind, record_size, first, count)?;
    pool.thread(map, first, count)?;

    tracing::info!(
        pool = kind.name(),
        added = count,
        capacity = pool.capacity(map),
        "grew pool"
    );
    Ok(())
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(ShmkvError::param("key is empty"));
    }
    if key.len() > u32::MAX as usize {
        return Err(ShmkvError::param("key longer than 4 GiB"));
    }
    Ok(())
}

// =============================================================================
// Key Operations Under Held Locks
// =============================================================================

/// Result of resolving a key
pub(crate) struct Lookup {
    pub key_hash: KeyHash,
    pub slot: u32,
    pub node: Option<u32>,
}

/// Key operations for callers already holding the right slot locks
pub(crate) struct Keys<'a> {
    pub map: &'a Mapping,
    pub alloc: Allocator<'a>,
    hash_fn: HashFn,
    hook: &'a dyn AttributeHook,
    pub now: u64,
}

impl<'a> Keys<'a> {
    pub fn lookup(&self, key: &[u8]) -> Result<Lookup> {
        let key_hash = self.hash_fn.hash(key);
        self.lookup_hashed(key, key_hash)
    }

    pub fn lookup_hashed(&self, key: &[u8], key_hash: KeyHash) -> Result<Lookup> {
        let route = index::resolve(self.map, key_hash.hash)?;
        let node = element::find(self.map, route.slot, key_hash, key)?;
        Ok(Lookup {
            key_hash,
            slot: route.slot,
            node,
        })
    }

    /// Node of `key` unless absent or expired
    pub fn live(&self, key: &[u8]) -> Result<Option<u32>> {
        match self.lookup(key)?.node {
            Some(node) if !self.is_expired(node)? => Ok(Some(node)),
            _ => Ok(None),
        }
    }

    pub fn blob(&self, node: u32, blob: Blob) -> Result<Vec<u8>> {
        let off = element::node_off(self.map, node)?;
        page::read_blob(self.map, page::blob_ref(self.map, off, blob))
    }

    pub fn blob_len(&self, node: u32, blob: Blob) -> Result<u64> {
        let off = element::node_off(self.map, node)?;
        Ok(page::blob_ref(self.map, off, blob).len)
    }

    pub fn attrs_of(&self, node: u32) -> Result<Attributes> {
        decode_attrs(&self.blob(node, Blob::Attrs)?)
    }

    pub fn subkeys_of(&self, node: u32) -> Result<Vec<Vec<u8>>> {
        decode_subkeys(&self.blob(node, Blob::Subkeys)?)
    }

    pub fn is_expired(&self, node: u32) -> Result<bool> {
        if self.blob_len(node, Blob::Attrs)? == 0 {
            return Ok(false);
        }
        Ok(self.hook.is_expired(&self.attrs_of(node)?, self.now))
    }

    pub fn modified_time(&self, node: u32) -> Result<Option<u64>> {
        Ok(self.hook.modified_time(&self.attrs_of(node)?))
    }

    /// Write some blobs of `key`, creating it if absent
    ///
    /// With `stamp`, the attribute policy records the modification. An
    /// expired key is treated as absent: blobs not being written start out
    /// empty instead of inheriting stale content.
    pub fn write(&self, key: &[u8], updates: &[(Blob, &[u8])], stamp: bool) -> Result<u32> {
        let found = self.lookup(key)?;
        let existing = match found.node {
            Some(node) if self.is_expired(node)? => {
                self.delete_node(found.slot, node)?;
                None
            }
            other => other,
        };

        let node = match existing {
            Some(node) => {
                self.rewrite(node, updates, stamp)?;
                node
            }
            None => {
                let blobs = self.stamped(None, updates, stamp)?;
                let node = self.insert(&found, key, &blobs.as_refs())?;
                self.touch();
                node
            }
        };
        Ok(node)
    }

    /// Overwrite some blobs of an existing node in place
    ///
    /// Expiry is not consulted, so an expired node stays expired. Either
    /// every blob is written or none is.
    pub fn rewrite(&self, node: u32, updates: &[(Blob, &[u8])], stamp: bool) -> Result<()> {
        let blobs = self.stamped(Some(node), updates, stamp)?;
        page::write_blobs(&self.alloc, element::node_off(self.map, node)?, &blobs.as_refs())?;
        self.touch();
        Ok(())
    }

    /// `updates`, with the attributes replaced by a stamped copy when asked
    fn stamped<'u>(
        &self,
        existing: Option<u32>,
        updates: &[(Blob, &'u [u8])],
        stamp: bool,
    ) -> Result<StampedBlobs<'u>> {
        let explicit_attrs = updates.iter().find(|(b, _)| *b == Blob::Attrs).map(|(_, a)| *a);
        let stamped = if stamp {
            let mut attrs = match (explicit_attrs, existing) {
                (Some(bytes), _) => decode_attrs(bytes)?,
                (None, Some(node)) => self.attrs_of(node)?,
                (None, None) => Attributes::new(),
            };
            self.hook.stamp_modified(&mut attrs, self.now);
            Some(encode_attrs(&attrs))
        } else {
            None
        };

        let blobs = updates
            .iter()
            .filter(|(b, _)| stamped.is_none() || *b != Blob::Attrs)
            .copied()
            .collect();
        Ok(StampedBlobs { blobs, stamped })
    }

    /// Allocate, fill and link a node for a key known to be absent
    pub fn insert(&self, found: &Lookup, key: &[u8], blobs: &[(Blob, &[u8])]) -> Result<u32> {
        let node = self.alloc.element()?;

        let filled = element::set_hash(self.map, node, found.key_hash).and_then(|_| {
            let mut all = Vec::with_capacity(blobs.len() + 1);
            all.push((Blob::Key, key));
            all.extend_from_slice(blobs);
            page::write_blobs(&self.alloc, element::node_off(self.map, node)?, &all)
        });

        if let Err(e) = filled {
            self.discard(node);
            return Err(e);
        }

        element::link(self.map, found.slot, node)?;
        Ok(node)
    }

    /// Return an unlinked node and its pages to the pools
    fn discard(&self, node: u32) {
        let released = element::node_off(self.map, node)
            .and_then(|off| page::free_blobs(&self.alloc, off))
            .and_then(|_| self.alloc.release_element(node));
        if let Err(e) = released {
            tracing::warn!(node, error = %e, "failed to release element after a failed insert");
        }
    }

    /// Remove `key`; returns whether it existed
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let found = self.lookup(key)?;
        match found.node {
            Some(node) => {
                self.delete_node(found.slot, node)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn delete_node(&self, slot: u32, node: u32) -> Result<()> {
        element::unlink(self.map, slot, node)?;
        page::free_blobs(&self.alloc, element::node_off(self.map, node)?)?;
        self.alloc.release_element(node)?;
        self.touch();
        Ok(())
    }

    /// Stamp the region's last-modified time
    pub fn touch(&self) {
        self.alloc.touch(self.now);
    }
}

/// Blob updates plus an owned, freshly stamped attribute blob
struct StampedBlobs<'u> {
    blobs: Vec<(Blob, &'u [u8])>,
    stamped: Option<Vec<u8>>,
}

impl StampedBlobs<'_> {
    fn as_refs(&self) -> Vec<(Blob, &[u8])> {
        let mut all = self.blobs.clone();
        if let Some(attrs) = self.stamped.as_deref() {
            all.push((Blob::Attrs, attrs));
        }
        all
    }
}
