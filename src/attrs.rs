//! Per-key attributes
//!
//! The core stores each key's attribute list as an opaque blob. Two
//! questions about it matter to the core: is the key expired, and when was
//! it last modified. Both go through an [`AttributeHook`] chosen at open
//! time, so other attribute policies (versioning, encryption) can sit above
//! the store without the core knowing their formats.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Attribute List
// =============================================================================

/// A key's attributes: name/value pairs kept sorted by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_sorted(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self { entries }
    }

    fn position(&self, name: &[u8]) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by(|(n, _)| n.as_slice().cmp(name))
    }

    /// Look up one attribute (binary search)
    pub fn get(&self, name: &[u8]) -> Option<&[u8]> {
        self.position(name).ok().map(|i| self.entries[i].1.as_slice())
    }

    /// Insert or replace an attribute
    pub fn set(&mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Ok(i) => self.entries[i].1 = value,
            Err(i) => self.entries.insert(i, (name, value)),
        }
    }

    /// Remove an attribute, returning its value
    pub fn remove(&mut self, name: &[u8]) -> Option<Vec<u8>> {
        self.position(name).ok().map(|i| self.entries.remove(i).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in name order
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries.iter().map(|(n, v)| (n.as_slice(), v.as_slice()))
    }

    /// A `u64` attribute stored as 8 little-endian bytes
    pub fn get_u64(&self, name: &[u8]) -> Option<u64> {
        self.get(name)
            .and_then(|v| <[u8; 8]>::try_from(v).ok())
            .map(u64::from_le_bytes)
    }

    pub fn set_u64(&mut self, name: impl Into<Vec<u8>>, value: u64) {
        self.set(name, value.to_le_bytes().to_vec());
    }
}

// =============================================================================
// Attribute Hook
// =============================================================================

/// How the store interprets attributes
pub trait AttributeHook: Send + Sync {
    /// Whether a key with these attributes has expired at `now_ms`
    fn is_expired(&self, attrs: &Attributes, now_ms: u64) -> bool;

    /// Last modification time in milliseconds, if recorded
    fn modified_time(&self, attrs: &Attributes) -> Option<u64>;

    /// Record a modification at `now_ms`
    fn stamp_modified(&self, attrs: &mut Attributes, now_ms: u64);
}

/// Attribute name holding the modification time (u64 LE millis)
pub const MTIME_ATTR: &[u8] = b"mtime";

/// Attribute name holding the expiry time (u64 LE millis)
pub const EXPIRES_ATTR: &[u8] = b"expires";

/// Default policy: `mtime` and `expires` attributes, both u64 LE millis
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardAttributes;

impl AttributeHook for StandardAttributes {
    fn is_expired(&self, attrs: &Attributes, now_ms: u64) -> bool {
        attrs.get_u64(EXPIRES_ATTR).map_or(false, |at| at <= now_ms)
    }

    fn modified_time(&self, attrs: &Attributes) -> Option<u64> {
        attrs.get_u64(MTIME_ATTR)
    }

    fn stamp_modified(&self, attrs: &mut Attributes, now_ms: u64) {
        attrs.set_u64(MTIME_ATTR, now_ms);
    }
}

/// Policy that never expires keys and never records modification times
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainAttributes;

impl AttributeHook for PlainAttributes {
    fn is_expired(&self, _attrs: &Attributes, _now_ms: u64) -> bool {
        false
    }

    fn modified_time(&self, _attrs: &Attributes) -> Option<u64> {
        None
    }

    fn stamp_modified(&self, _attrs: &mut Attributes, _now_ms: u64) {}
}
