//! Configuration for shmkv
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, ShmkvError};
use crate::hash::HashFn;

/// Deepest bucket index a region may grow to
pub const MAX_BIT_DEPTH: u32 = 24;

/// Widest collision group (2^8 slots per bucket entry)
pub const MAX_COLLISION_BITS: u32 = 8;

/// Bound on `max_bit_depth + collision_bits`, keeping slot indices in u32
const MAX_SLOT_BITS: u32 = 30;

/// Main configuration for a shmkv store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Backing Configuration
    // -------------------------------------------------------------------------
    /// Backing file for the region. `None` maps anonymous memory that lives
    /// as long as the store handle.
    pub path: Option<PathBuf>,

    /// Whether to create a new region, attach to an existing one, or either
    pub open_mode: OpenMode,

    /// Primary/secondary hash implementation, stamped in the region header
    pub hash_fn: HashFn,

    // -------------------------------------------------------------------------
    // Index Configuration (used only when creating a region)
    // -------------------------------------------------------------------------
    /// Initial bucket index bit-depth (also the region's minimum depth)
    pub bit_depth: u32,

    /// Upper bound for `Store::grow_index`
    pub max_bit_depth: u32,

    /// Each bucket entry owns 2^collision_bits collision slots
    pub collision_bits: u32,

    // -------------------------------------------------------------------------
    // Pool Configuration (used only when creating a region)
    // -------------------------------------------------------------------------
    /// Size of one page in the page pool, header included
    pub page_size: u32,

    /// Number of element nodes allocated at creation
    pub element_capacity: u32,

    /// Number of pages allocated at creation
    pub page_capacity: u32,

    // -------------------------------------------------------------------------
    // Concurrency Configuration
    // -------------------------------------------------------------------------
    /// Number of in-process lock stripes covering the collision slots
    pub lock_stripes: u32,
}

/// How `Store::open` treats the backing file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Always create; replaces an existing file
    Create,

    /// Attach to an existing region; fails if missing
    Open,

    /// Attach if the file exists, create otherwise
    OpenOrCreate,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: None,
            open_mode: OpenMode::OpenOrCreate,
            hash_fn: HashFn::Crc32,
            bit_depth: 8,
            max_bit_depth: 20,
            collision_bits: 2,
            page_size: 256,
            element_capacity: 4096,
            page_capacity: 16384, // 4 MB of pages at the default size
            lock_stripes: 1024,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that every value is usable before touching any file
    pub fn validate(&self) -> Result<()> {
        if self.max_bit_depth > MAX_BIT_DEPTH {
            return Err(ShmkvError::Config(format!(
                "max_bit_depth {} exceeds {}",
                self.max_bit_depth, MAX_BIT_DEPTH
            )));
        }
        if self.bit_depth > self.max_bit_depth {
            return Err(ShmkvError::Config(format!(
                "bit_depth {} exceeds max_bit_depth {}",
                self.bit_depth, self.max_bit_depth
            )));
        }
        if self.collision_bits > MAX_COLLISION_BITS {
            return Err(ShmkvError::Config(format!(
                "collision_bits {} exceeds {}",
                self.collision_bits, MAX_COLLISION_BITS
            )));
        }
        if !self.page_size.is_power_of_two() || !(64..=65536).contains(&self.page_size) {
            return Err(ShmkvError::Config(format!(
                "page_size {} must be a power of two in 64..=65536",
                self.page_size
            )));
        }
        if self.element_capacity == 0 || self.page_capacity == 0 {
            return Err(ShmkvError::Config(
                "element_capacity and page_capacity must be non-zero".to_string(),
            ));
        }
        if self.element_capacity == u32::MAX || self.page_capacity == u32::MAX {
            return Err(ShmkvError::Config(
                "element_capacity and page_capacity must leave room for the null record"
                    .to_string(),
            ));
        }
        if self.max_bit_depth + self.collision_bits > MAX_SLOT_BITS {
            return Err(ShmkvError::Config(format!(
                "max_bit_depth + collision_bits must not exceed {}",
                MAX_SLOT_BITS
            )));
        }
        if self.lock_stripes == 0 {
            return Err(ShmkvError::Config("lock_stripes must be non-zero".to_string()));
        }
        if self.path.is_none() && self.open_mode == OpenMode::Open {
            return Err(ShmkvError::Config(
                "an anonymous region cannot be opened, only created".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Back the region with a file at `path`
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = Some(path.into());
        self
    }

    /// Use an anonymous mapping (no backing file)
    pub fn anonymous(mut self) -> Self {
        self.config.path = None;
        self.config.open_mode = OpenMode::Create;
        self
    }

    /// Set the open mode
    pub fn open_mode(mut self, mode: OpenMode) -> Self {
        self.config.open_mode = mode;
        self
    }

    /// Set the hash implementation
    pub fn hash_fn(mut self, hash_fn: HashFn) -> Self {
        self.config.hash_fn = hash_fn;
        self
    }

    /// Set the initial bucket index bit-depth
    pub fn bit_depth(mut self, depth: u32) -> Self {
        self.config.bit_depth = depth;
        self
    }

    /// Set the maximum bucket index bit-depth
    pub fn max_bit_depth(mut self, depth: u32) -> Self {
        self.config.max_bit_depth = depth;
        self
    }

    /// Set the collision bit-depth
    pub fn collision_bits(mut self, bits: u32) -> Self {
        self.config.collision_bits = bits;
        self
    }

    /// Set the page size (in bytes)
    pub fn page_size(mut self, size: u32) -> Self {
        self.config.page_size = size;
        self
    }

    /// Set the initial number of element nodes
    pub fn element_capacity(mut self, count: u32) -> Self {
        self.config.element_capacity = count;
        self
    }

    /// Set the initial number of pages
    pub fn page_capacity(mut self, count: u32) -> Self {
        self.config.page_capacity = count;
        self
    }

    /// Set the number of in-process lock stripes
    pub fn lock_stripes(mut self, count: u32) -> Self {
        self.config.lock_stripes = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
