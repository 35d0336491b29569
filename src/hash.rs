//! Key hashing
//!
//! Every key is reduced to a primary `hash` (routes the key through the
//! bucket index and orders it inside a collision slot) and a secondary
//! `subhash` (breaks ties between keys sharing a primary hash before the
//! store falls back to comparing key bytes).
//!
//! The hash implementation is chosen once, at open time, through
//! [`Config::hash_fn`](crate::Config). Its name is stamped into the region
//! header so a process using a different implementation cannot attach.

use std::fmt;

/// Primary and secondary hash of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyHash {
    pub hash: u32,
    pub subhash: u32,
}

impl KeyHash {
    pub fn new(hash: u32, subhash: u32) -> Self {
        Self { hash, subhash }
    }
}

/// Seed for the CRC32 subhash (golden ratio)
const CRC_SUBHASH_SEED: u32 = 0x9E37_79B9;

const FNV_OFFSET_BASIS: u32 = 0x811C_9DC5;
const FNV_PRIME: u32 = 0x0100_0193;
const FNV_SUBHASH_BASIS: u32 = 0x050C_5D1F;

/// Which primary/secondary hash implementation a store uses
#[derive(Clone, Copy)]
pub enum HashFn {
    /// CRC32 (IEEE) for the primary hash, seeded CRC32 for the subhash
    Crc32,

    /// 32-bit FNV-1a, with a finalizer-mixed second pass for the subhash
    Fnv1a,

    /// Caller-supplied implementation; `name` is what gets stamped in the header
    Custom {
        name: &'static str,
        func: fn(&[u8]) -> KeyHash,
    },
}

impl HashFn {
    /// Name recorded in the region header (at most 16 bytes are kept)
    pub fn name(&self) -> &str {
        match self {
            HashFn::Crc32 => "crc32",
            HashFn::Fnv1a => "fnv1a",
            HashFn::Custom { name, .. } => name,
        }
    }

    /// Hash a key
    pub fn hash(&self, key: &[u8]) -> KeyHash {
        match self {
            HashFn::Crc32 => {
                let hash = crc32fast::hash(key);
                let mut hasher = crc32fast::Hasher::new_with_initial(CRC_SUBHASH_SEED);
                hasher.update(key);
                KeyHash::new(hash, hasher.finalize())
            }
            HashFn::Fnv1a => {
                let hash = fnv1a(FNV_OFFSET_BASIS, key);
                let subhash = fmix32(fnv1a(FNV_SUBHASH_BASIS, key));
                KeyHash::new(hash, subhash)
            }
            HashFn::Custom { func, .. } => func(key),
        }
    }
}

impl Default for HashFn {
    fn default() -> Self {
        HashFn::Crc32
    }
}

impl fmt::Debug for HashFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashFn::Crc32 => f.write_str("Crc32"),
            HashFn::Fnv1a => f.write_str("Fnv1a"),
            HashFn::Custom { name, .. } => f.debug_struct("Custom").field("name", name).finish(),
        }
    }
}

impl PartialEq for HashFn {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for HashFn {}

fn fnv1a(basis: u32, data: &[u8]) -> u32 {
    data.iter()
        .fold(basis, |h, &b| (h ^ b as u32).wrapping_mul(FNV_PRIME))
}

/// murmur3 finalizer
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85EB_CA6B);
    h ^= h >> 13;
    h = h.wrapping_mul(0xC2B2_AE35);
    h ^= h >> 16;
    h
}
