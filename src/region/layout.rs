//! Region layout constants
//!
//! Every multi-byte field is little-endian. Offsets are relative to the
//! start of the mapping, record fields relative to the record start.

/// Magic bytes identifying a shmkv region
pub(crate) const MAGIC: &[u8; 8] = b"SHMKVRGN";

/// Current on-disk format version
pub(crate) const FORMAT_VERSION: u32 = 1;

/// Areas start on this boundary
pub(crate) const REGION_ALIGN: u64 = 4096;

/// The header occupies the first page of the region
pub(crate) const HEADER_SIZE: u64 = 4096;

/// Maximum number of entries in the area directory
pub(crate) const MAX_AREAS: usize = 64;

/// Bytes reserved for the hash implementation name
pub(crate) const HASH_NAME_LEN: usize = 16;

// =============================================================================
// Header Fields
// =============================================================================

pub(crate) mod hdr {
    pub const MAGIC: usize = 0;
    pub const VERSION: usize = 8;
    pub const HASH_NAME: usize = 16;
    pub const BIT_DEPTH: usize = 32;
    pub const MIN_BIT_DEPTH: usize = 36;
    pub const MAX_BIT_DEPTH: usize = 40;
    pub const COLLISION_BITS: usize = 44;
    pub const PAGE_SIZE: usize = 48;
    /// Deepest routing depth of any owning bucket entry
    pub const ROUTING_DEPTH: usize = 52;
    pub const REGION_LEN: usize = 56;
    pub const LAST_MODIFIED: usize = 64;
    pub const LAST_GROWN: usize = 72;
    pub const ELEMENT_COUNT: usize = 80;
    pub const ELEMENT_CAPACITY: usize = 84;
    pub const FREE_ELEMENT_HEAD: usize = 88;
    pub const FREE_ELEMENT_COUNT: usize = 92;
    pub const PAGE_CAPACITY: usize = 96;
    pub const FREE_PAGE_HEAD: usize = 100;
    pub const FREE_PAGE_COUNT: usize = 104;
    pub const SLOT_CAPACITY: usize = 108;
    pub const SLOTS_USED: usize = 112;
    pub const BUCKET_CAPACITY: usize = 116;
    pub const AREA_COUNT: usize = 120;
    pub const LOCK_STRIPES: usize = 124;
    pub const AREA_DIR: usize = 128;
}

// =============================================================================
// Area Directory Entries (32 bytes each)
// =============================================================================
//
// ┌──────────┬───────────┬────────────┬────────────┬─────────────┬──────────┐
// │ kind (4) │ recsz (4) │ offset (8) │ length (8) │ first (4)   │ count (4)│
// └──────────┴───────────┴────────────┴────────────┴─────────────┴──────────┘

pub(crate) const AREA_ENTRY_SIZE: usize = 32;

pub(crate) mod area {
    pub const KIND: usize = 0;
    pub const RECORD_SIZE: usize = 4;
    pub const OFFSET: usize = 8;
    pub const LENGTH: usize = 16;
    pub const FIRST_INDEX: usize = 24;
    pub const COUNT: usize = 28;
}

/// The four growable areas of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AreaKind {
    Buckets = 1,
    Slots = 2,
    Elements = 3,
    Pages = 4,
}

impl AreaKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(AreaKind::Buckets),
            2 => Some(AreaKind::Slots),
            3 => Some(AreaKind::Elements),
            4 => Some(AreaKind::Pages),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AreaKind::Buckets => "bucket",
            AreaKind::Slots => "collision slot",
            AreaKind::Elements => "element",
            AreaKind::Pages => "page",
        }
    }
}

// =============================================================================
// Bucket Entry (16 bytes)
// =============================================================================

pub(crate) const BUCKET_SIZE: u32 = 16;

pub(crate) mod bucket {
    pub const ASSIGNED: usize = 0;
    pub const SHIFTED_MASK: usize = 4;
    pub const MASKED_HASH: usize = 8;
    pub const SLOT_GROUP: usize = 12;
}

// =============================================================================
// Collision Slot (8 bytes)
// =============================================================================

pub(crate) const SLOT_SIZE: u32 = 8;

pub(crate) mod slot {
    pub const COUNT: usize = 0;
    pub const ROOT: usize = 4;
}

// =============================================================================
// Element Node (96 bytes)
// =============================================================================
//
// ┌──────┬─────────┬─────┬───────┬──────┬─────┬───────┬──────┐
// │ hash │ subhash │ big │ small │ same │ gen │ flags │ rsvd │  8 x u32
// ├──────┴─────────┴─────┴───────┴──────┴─────┴───────┴──────┤
// │ 4 x blob ref: [first_page u32][rsvd u32][len u64]        │
// └──────────────────────────────────────────────────────────┘

pub(crate) const ELEMENT_SIZE: u32 = 96;

pub(crate) mod node {
    pub const HASH: usize = 0;
    pub const SUBHASH: usize = 4;
    pub const BIG: usize = 8;
    pub const SMALL: usize = 12;
    /// Duplicate chain while linked, free list while released
    pub const SAME: usize = 16;
    pub const GENERATION: usize = 20;
    pub const FLAGS: usize = 24;
    pub const BLOBS: usize = 32;
    pub const BLOB_REF_SIZE: usize = 16;
    pub const BLOB_FIRST_PAGE: usize = 0;
    pub const BLOB_LEN: usize = 8;
}

// =============================================================================
// Page (header + inline data)
// =============================================================================

pub(crate) const PAGE_HEADER_SIZE: u32 = 24;

pub(crate) mod page {
    pub const PREV: usize = 0;
    /// Chain link while used, free list while released
    pub const NEXT: usize = 4;
    pub const USED: usize = 8;
    pub const GENERATION: usize = 12;
    pub const FLAGS: usize = 16;
    pub const DATA: usize = 24;
}

/// Record flag: the record is handed out by its arena
pub(crate) const FLAG_LIVE: u32 = 1;

/// Round `value` up to the region alignment
pub(crate) fn align_up(value: u64) -> u64 {
    (value + REGION_ALIGN - 1) & !(REGION_ALIGN - 1)
}
