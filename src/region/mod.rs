//! Region Table
//!
//! The shared memory region: a fixed header followed by four growable areas
//! (bucket index, collision slots, element pool, page pool).
//!
//! ## Region Layout
//! ```text
//! ┌──────────────────┐ 0
//! │ Header (4 KiB)   │ magic, version, hash name, depths, counters,
//! │                  │ free lists, area directory (64 x 32 bytes)
//! ├──────────────────┤ 4096
//! │ Buckets          │ 16-byte bucket entries
//! ├──────────────────┤
//! │ Collision Slots  │ 8-byte slots (count + root element)
//! ├──────────────────┤
//! │ Elements         │ 96-byte element nodes
//! ├──────────────────┤
//! │ Pages            │ page_size-byte pages
//! ├──────────────────┤
//! │ ...appended      │ later areas of any kind, page aligned
//! └──────────────────┘
//! ```
//!
//! ## Locks
//! The mapping sits behind the area-growth lock. Key operations hold it
//! shared; growth holds it exclusively and is the only thing that remaps.

pub(crate) mod arena;
pub(crate) mod layout;
pub(crate) mod lock;
pub(crate) mod mapping;

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, OpenMode};
use crate::error::{Result, ShmkvError};

use self::arena::Allocator;
use self::layout::{hdr, HASH_NAME_LEN};
use self::lock::{
    FileRange, LockTable, SharedLock, SharedReadGuard, SharedWriteGuard, ALLOC_LOCK, GROWTH_LOCK,
};
use self::mapping::{InitialLayout, Mapping};

/// An attached region plus this process's locks on it
pub(crate) struct Region {
    mapping: SharedLock<Mapping>,
    slots: LockTable,
    alloc: SharedLock<()>,
}

impl Region {
    /// Create or attach according to `config.open_mode`
    ///
    /// `init` runs on a freshly laid-out region before it becomes visible
    /// to other processes. It is not called when attaching.
    pub fn open<F>(config: &Config, layout: &InitialLayout<'_>, init: F) -> Result<Self>
    where
        F: FnOnce(&Mapping) -> Result<()>,
    {
        match (&config.path, config.open_mode) {
            (None, _) => Self::create(None, layout, init),
            (Some(path), OpenMode::Create) => Self::create(Some(path.as_path()), layout, init),
            (Some(path), OpenMode::Open) => Self::attach(path, config),
            (Some(path), OpenMode::OpenOrCreate) => {
                if path.exists() {
                    Self::attach(path, config)
                } else {
                    Self::create(Some(path.as_path()), layout, init)
                }
            }
        }
    }

    fn create<F>(path: Option<&Path>, layout: &InitialLayout<'_>, init: F) -> Result<Self>
    where
        F: FnOnce(&Mapping) -> Result<()>,
    {
        let mapping = Mapping::create(path, layout, init)?;
        let file = mapping.file();

        tracing::info!(
            path = ?path,
            bit_depth = layout.bit_depth,
            collision_bits = layout.collision_bits,
            region_len = mapping.len(),
            "created region"
        );
        Ok(Self::with_locks(mapping, layout.lock_stripes, file))
    }

    fn attach(path: &Path, config: &Config) -> Result<Self> {
        let file = Arc::new(OpenOptions::new().read(true).write(true).open(path)?);

        // Hold the growth lock shared so the directory is not read mid-append
        let growth = FileRange::new(Some(Arc::clone(&file)), GROWTH_LOCK);
        growth.shared()?;
        let attached = Mapping::attach(Arc::clone(&file));
        if let Err(e) = growth.unlock() {
            tracing::warn!(error = %e, "failed to release growth lock after attach");
        }
        let mapping = attached?;

        let expected = truncated_name(config.hash_fn.name());
        let found = mapping.hash_name();
        if found != expected {
            return Err(ShmkvError::IncompatibleRegion(format!(
                "region uses hash '{}' but the store was opened with '{}'",
                found, expected
            )));
        }

        let stripes = mapping.u32_at(hdr::LOCK_STRIPES);
        if stripes == 0 {
            return Err(ShmkvError::IncompatibleRegion(
                "region header has no lock stripe count".to_string(),
            ));
        }

        tracing::info!(
            path = %path.display(),
            bit_depth = mapping.u32_at(hdr::BIT_DEPTH),
            elements = mapping.u32_at(hdr::ELEMENT_COUNT),
            region_len = mapping.len(),
            "attached region"
        );
        Ok(Self::with_locks(mapping, stripes, Some(file)))
    }

    fn with_locks(mapping: Mapping, stripes: u32, file: Option<Arc<File>>) -> Self {
        Self {
            slots: LockTable::new(stripes, file.clone()),
            alloc: SharedLock::new((), FileRange::new(file.clone(), ALLOC_LOCK)),
            mapping: SharedLock::new(mapping, FileRange::new(file, GROWTH_LOCK)),
        }
    }

    // =========================================================================
    // Lock Access
    // =========================================================================

    /// Hold the growth lock shared, remapping first if another process grew
    /// the region
    pub fn read(&self) -> Result<SharedReadGuard<'_, Mapping>> {
        loop {
            let guard = self.mapping.read()?;
            if !guard.is_stale() {
                return Ok(guard);
            }
            drop(guard);
            let mut guard = self.mapping.write()?;
            if guard.is_stale() {
                guard.refresh()?;
            }
        }
    }

    /// Hold the growth lock exclusively (growth and split)
    pub fn write(&self) -> Result<SharedWriteGuard<'_, Mapping>> {
        let mut guard = self.mapping.write()?;
        if guard.is_stale() {
            guard.refresh()?;
        }
        Ok(guard)
    }

    pub fn slots(&self) -> &LockTable {
        &self.slots
    }

    /// Pool access for `map`, locking the free lists per call
    pub fn allocator<'a>(&'a self, map: &'a Mapping) -> Allocator<'a> {
        Allocator::new(map, &self.alloc)
    }
}

/// The hash name as stored in the header (at most `HASH_NAME_LEN` bytes)
fn truncated_name(name: &str) -> String {
    let bytes = name.as_bytes();
    let n = bytes.len().min(HASH_NAME_LEN);
    String::from_utf8_lossy(&bytes[..n]).into_owned()
}
