//! Region mapping
//!
//! Owns the memory map of a region and the process-local view of its area
//! directory. Everything stored in the region is addressed by index or
//! offset; a `Mapping` is the only place those turn into addresses, and
//! those addresses are never written back into the region.
//!
//! ## Responsibilities
//! - Create a zero-filled region (header + four areas) without ever leaving
//!   a half-initialized file behind
//! - Attach to an existing region and reject incompatible ones
//! - Append areas when the region grows, and remap when another process did
//! - Bounds-checked little-endian field access

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;

use memmap2::{MmapMut, MmapOptions, MmapRaw};

use crate::attrs::now_millis;
use crate::error::{Result, ShmkvError};

use super::layout::{
    align_up, area, hdr, AreaKind, AREA_ENTRY_SIZE, FORMAT_VERSION, HASH_NAME_LEN, HEADER_SIZE,
    MAGIC, MAX_AREAS,
};

/// What the mapping is backed by
pub(crate) enum Backing {
    File(Arc<File>),
    Anonymous,
}

/// One contiguous run of records inside an area
#[derive(Debug, Clone, Copy)]
pub(crate) struct Extent {
    pub offset: usize,
    pub record_size: u32,
    pub first_index: u32,
    pub count: u32,
}

impl Extent {
    fn contains(&self, index: u32) -> bool {
        index >= self.first_index && index - self.first_index < self.count
    }
}

/// Process-local copy of the area directory, grouped by kind
#[derive(Debug, Default)]
pub(crate) struct AreaTable {
    buckets: Vec<Extent>,
    slots: Vec<Extent>,
    elements: Vec<Extent>,
    pages: Vec<Extent>,
}

impl AreaTable {
    fn list(&self, kind: AreaKind) -> &[Extent] {
        match kind {
            AreaKind::Buckets => &self.buckets,
            AreaKind::Slots => &self.slots,
            AreaKind::Elements => &self.elements,
            AreaKind::Pages => &self.pages,
        }
    }

    fn push(&mut self, kind: AreaKind, extent: Extent) {
        match kind {
            AreaKind::Buckets => self.buckets.push(extent),
            AreaKind::Slots => self.slots.push(extent),
            AreaKind::Elements => self.elements.push(extent),
            AreaKind::Pages => self.pages.push(extent),
        }
    }
}

/// Initial record counts for a new region
pub(crate) struct InitialLayout<'a> {
    pub hash_name: &'a str,
    pub bit_depth: u32,
    pub max_bit_depth: u32,
    pub collision_bits: u32,
    pub page_size: u32,
    pub lock_stripes: u32,
    pub buckets: (u32, u32),
    pub slots: (u32, u32),
    pub elements: (u32, u32),
    pub pages: (u32, u32),
}

/// A mapped region
pub(crate) struct Mapping {
    raw: MmapRaw,
    len: usize,
    backing: Backing,
    areas: AreaTable,
}

impl Mapping {
    // =========================================================================
    // Creation
    // =========================================================================

    /// Create a new region
    ///
    /// File-backed regions are built under a temporary name, initialized by
    /// `init`, flushed and only then renamed into place. Any failure removes
    /// the temporary file.
    pub fn create<F>(path: Option<&Path>, layout: &InitialLayout<'_>, init: F) -> Result<Self>
    where
        F: FnOnce(&Mapping) -> Result<()>,
    {
        let total = Self::initial_len(layout);

        match path {
            None => {
                let anon = MmapOptions::new().len(total as usize).map_anon()?;
                let mut mapping = Self::from_parts(MmapRaw::from(anon), total as usize, Backing::Anonymous);
                mapping.lay_out(layout)?;
                init(&mapping)?;
                Ok(mapping)
            }
            Some(path) => {
                if let Some(dir) = path.parent() {
                    if !dir.as_os_str().is_empty() {
                        fs::create_dir_all(dir)?;
                    }
                }
                let tmp = temp_path(path);
                let built = Self::build_file(&tmp, total, layout, init);
                match built {
                    Ok(mapping) => {
                        if let Err(e) = fs::rename(&tmp, path) {
                            let _ = fs::remove_file(&tmp);
                            return Err(e.into());
                        }
                        Ok(mapping)
                    }
                    Err(e) => {
                        let _ = fs::remove_file(&tmp);
                        Err(e)
                    }
                }
            }
        }
    }

    fn build_file<F>(tmp: &Path, total: u64, layout: &InitialLayout<'_>, init: F) -> Result<Self>
    where
        F: FnOnce(&Mapping) -> Result<()>,
    {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(tmp)?;

        // set_len zero-fills every area
        file.set_len(total)?;

        let raw = MmapOptions::new().len(total as usize).map_raw(&file)?;
        let mut mapping = Self::from_parts(raw, total as usize, Backing::File(Arc::new(file)));
        mapping.lay_out(layout)?;
        init(&mapping)?;
        mapping.flush()?;
        Ok(mapping)
    }

    fn initial_len(layout: &InitialLayout<'_>) -> u64 {
        let area_len = |(count, size): (u32, u32)| align_up(count as u64 * size as u64);
        HEADER_SIZE
            + area_len(layout.buckets)
            + area_len(layout.slots)
            + area_len(layout.elements)
            + area_len(layout.pages)
    }

    fn from_parts(raw: MmapRaw, len: usize, backing: Backing) -> Self {
        Self {
            raw,
            len,
            backing,
            areas: AreaTable::default(),
        }
    }

    /// Write the header and the area directory of a fresh region
    fn lay_out(&mut self, layout: &InitialLayout<'_>) -> Result<()> {
        self.write_bytes(hdr::MAGIC, MAGIC);
        self.set_u32(hdr::VERSION, FORMAT_VERSION);

        let mut name = [0u8; HASH_NAME_LEN];
        let bytes = layout.hash_name.as_bytes();
        let n = bytes.len().min(HASH_NAME_LEN);
        name[..n].copy_from_slice(&bytes[..n]);
        self.write_bytes(hdr::HASH_NAME, &name);

        self.set_u32(hdr::BIT_DEPTH, layout.bit_depth);
        self.set_u32(hdr::MIN_BIT_DEPTH, layout.bit_depth);
        self.set_u32(hdr::MAX_BIT_DEPTH, layout.max_bit_depth);
        self.set_u32(hdr::COLLISION_BITS, layout.collision_bits);
        self.set_u32(hdr::PAGE_SIZE, layout.page_size);
        self.set_u32(hdr::ROUTING_DEPTH, layout.bit_depth);
        self.set_u32(hdr::LOCK_STRIPES, layout.lock_stripes);
        self.set_u64(hdr::REGION_LEN, self.len as u64);
        let now = now_millis();
        self.set_u64(hdr::LAST_MODIFIED, now);
        self.set_u64(hdr::LAST_GROWN, now);

        let mut offset = HEADER_SIZE;
        for (kind, (count, size)) in [
            (AreaKind::Buckets, layout.buckets),
            (AreaKind::Slots, layout.slots),
            (AreaKind::Elements, layout.elements),
            (AreaKind::Pages, layout.pages),
        ] {
            let length = align_up(count as u64 * size as u64);
            self.push_area(kind, size, offset, length, 0, count)?;
            offset += length;
        }

        self.set_u32(hdr::BUCKET_CAPACITY, layout.buckets.0);
        self.set_u32(hdr::SLOT_CAPACITY, layout.slots.0);
        // Element and page capacities are counted as records get threaded
        // onto their free lists (record 0 is the null index)
        Ok(())
    }

    // =========================================================================
    // Attach / Refresh
    // =========================================================================

    /// Attach to an existing region file
    pub fn attach(file: Arc<File>) -> Result<Self> {
        let file_len = file.metadata()?.len();
        if file_len < HEADER_SIZE {
            return Err(ShmkvError::IncompatibleRegion(format!(
                "file is {} bytes, smaller than the region header",
                file_len
            )));
        }

        let header = MmapOptions::new().len(HEADER_SIZE as usize).map_raw(&*file)?;
        let probe = Self::from_parts(header, HEADER_SIZE as usize, Backing::Anonymous);
        probe.check_header()?;
        let region_len = probe.u64_at(hdr::REGION_LEN);
        drop(probe);

        if region_len > file_len || region_len < HEADER_SIZE {
            return Err(ShmkvError::IncompatibleRegion(format!(
                "header claims {} bytes but the file has {}",
                region_len, file_len
            )));
        }

        let raw = MmapOptions::new().len(region_len as usize).map_raw(&*file)?;
        let mut mapping = Self::from_parts(raw, region_len as usize, Backing::File(file));
        mapping.load_areas()?;
        Ok(mapping)
    }

    fn check_header(&self) -> Result<()> {
        let mut magic = [0u8; 8];
        self.read_bytes(hdr::MAGIC, &mut magic);
        if &magic != MAGIC {
            return Err(ShmkvError::IncompatibleRegion(format!(
                "invalid magic: expected {:?}, got {:?}",
                MAGIC, magic
            )));
        }
        let version = self.u32_at(hdr::VERSION);
        if version != FORMAT_VERSION {
            return Err(ShmkvError::IncompatibleRegion(format!(
                "unsupported format version {} (expected {})",
                version, FORMAT_VERSION
            )));
        }
        Ok(())
    }

    /// Rebuild the process-local area table from the header
    fn load_areas(&mut self) -> Result<()> {
        let count = self.u32_at(hdr::AREA_COUNT) as usize;
        if count > MAX_AREAS {
            return Err(ShmkvError::IncompatibleRegion(format!(
                "area directory holds {} entries (max {})",
                count, MAX_AREAS
            )));
        }

        let mut areas = AreaTable::default();
        for i in 0..count {
            let entry = hdr::AREA_DIR + i * AREA_ENTRY_SIZE;
            let kind = AreaKind::from_u32(self.u32_at(entry + area::KIND)).ok_or_else(|| {
                ShmkvError::IncompatibleRegion(format!("area {} has an unknown kind", i))
            })?;
            let record_size = self.u32_at(entry + area::RECORD_SIZE);
            let offset = self.u64_at(entry + area::OFFSET);
            let length = self.u64_at(entry + area::LENGTH);
            let first_index = self.u32_at(entry + area::FIRST_INDEX);
            let count = self.u32_at(entry + area::COUNT);

            let needed = count as u64 * record_size as u64;
            if record_size == 0 || needed > length || offset + length > self.len as u64 {
                return Err(ShmkvError::IncompatibleRegion(format!(
                    "{} area {} does not fit the region",
                    kind.name(),
                    i
                )));
            }
            areas.push(
                kind,
                Extent {
                    offset: offset as usize,
                    record_size,
                    first_index,
                    count,
                },
            );
        }
        self.areas = areas;
        Ok(())
    }

    /// True when another process grew the region since this view was mapped
    pub fn is_stale(&self) -> bool {
        self.u64_at(hdr::REGION_LEN) != self.len as u64
    }

    /// Remap to the length recorded in the header
    pub fn refresh(&mut self) -> Result<()> {
        let region_len = self.u64_at(hdr::REGION_LEN);
        let file = match &self.backing {
            Backing::File(file) => Arc::clone(file),
            // Nobody else can grow an anonymous mapping
            Backing::Anonymous => return Ok(()),
        };

        let file_len = file.metadata()?.len();
        if region_len > file_len {
            return Err(ShmkvError::corrupt(format!(
                "header claims {} bytes but the file has {}",
                region_len, file_len
            )));
        }

        self.raw = MmapOptions::new().len(region_len as usize).map_raw(&*file)?;
        self.len = region_len as usize;
        self.load_areas()?;

        tracing::debug!(region_len, "remapped region after external growth");
        Ok(())
    }

    // =========================================================================
    // Growth
    // =========================================================================

    /// Append a zero-filled area of `count` records at the end of the region
    ///
    /// Must be called with the area-growth lock held exclusively.
    pub fn append_area(
        &mut self,
        kind: AreaKind,
        record_size: u32,
        first_index: u32,
        count: u32,
    ) -> Result<usize> {
        if self.u32_at(hdr::AREA_COUNT) as usize >= MAX_AREAS {
            return Err(ShmkvError::PoolExhausted {
                pool: "area directory",
            });
        }

        let offset = align_up(self.len as u64);
        let length = align_up(count as u64 * record_size as u64);
        let new_len = offset + length;
        self.resize(new_len as usize)?;

        self.push_area(kind, record_size, offset, length, first_index, count)?;
        self.set_u64(hdr::REGION_LEN, new_len);
        self.set_u64(hdr::LAST_GROWN, now_millis());

        tracing::info!(
            area = kind.name(),
            first_index,
            count,
            region_len = new_len,
            "appended region area"
        );
        Ok(offset as usize)
    }

    fn push_area(
        &mut self,
        kind: AreaKind,
        record_size: u32,
        offset: u64,
        length: u64,
        first_index: u32,
        count: u32,
    ) -> Result<()> {
        let index = self.u32_at(hdr::AREA_COUNT) as usize;
        if index >= MAX_AREAS {
            return Err(ShmkvError::PoolExhausted {
                pool: "area directory",
            });
        }

        let entry = hdr::AREA_DIR + index * AREA_ENTRY_SIZE;
        self.set_u32(entry + area::KIND, kind as u32);
        self.set_u32(entry + area::RECORD_SIZE, record_size);
        self.set_u64(entry + area::OFFSET, offset);
        self.set_u64(entry + area::LENGTH, length);
        self.set_u32(entry + area::FIRST_INDEX, first_index);
        self.set_u32(entry + area::COUNT, count);
        self.set_u32(hdr::AREA_COUNT, index as u32 + 1);

        self.areas.push(
            kind,
            Extent {
                offset: offset as usize,
                record_size,
                first_index,
                count,
            },
        );
        Ok(())
    }

    fn resize(&mut self, new_len: usize) -> Result<()> {
        match &self.backing {
            Backing::File(file) => {
                let file = Arc::clone(file);
                file.set_len(new_len as u64)?;
                self.raw = MmapOptions::new().len(new_len).map_raw(&*file)?;
            }
            Backing::Anonymous => {
                let grown: MmapMut = MmapOptions::new().len(new_len).map_anon()?;
                let grown = MmapRaw::from(grown);
                // SAFETY: both mappings are live, distinct and at least `self.len` long.
                unsafe {
                    ptr::copy_nonoverlapping(self.raw.as_ptr(), grown.as_mut_ptr(), self.len);
                }
                self.raw = grown;
            }
        }
        self.len = new_len;
        Ok(())
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Offset of record `index` of an area
    pub fn record(&self, kind: AreaKind, index: u32) -> Result<usize> {
        self.areas
            .list(kind)
            .iter()
            .find(|extent| extent.contains(index))
            .map(|extent| {
                extent.offset + (index - extent.first_index) as usize * extent.record_size as usize
            })
            .ok_or_else(|| {
                ShmkvError::corrupt(format!("{} index {} outside every area", kind.name(), index))
            })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_file_backed(&self) -> bool {
        matches!(self.backing, Backing::File(_))
    }

    /// Backing file, shared with the lock layer
    pub fn file(&self) -> Option<Arc<File>> {
        match &self.backing {
            Backing::File(file) => Some(Arc::clone(file)),
            Backing::Anonymous => None,
        }
    }

    /// Hash implementation name stamped at creation
    pub fn hash_name(&self) -> String {
        let mut name = [0u8; HASH_NAME_LEN];
        self.read_bytes(hdr::HASH_NAME, &mut name);
        let end = name.iter().position(|&b| b == 0).unwrap_or(HASH_NAME_LEN);
        String::from_utf8_lossy(&name[..end]).into_owned()
    }

    /// msync the region (no-op for anonymous regions)
    pub fn flush(&self) -> Result<()> {
        if self.is_file_backed() {
            self.raw.flush()?;
        }
        Ok(())
    }

    // =========================================================================
    // Raw Access
    // =========================================================================
    //
    // Offsets come from validated extents and fixed record layouts. An
    // out-of-range offset is a bug in this crate, not bad input, so it panics
    // instead of touching memory outside the mapping.

    fn check(&self, offset: usize, len: usize) {
        assert!(
            offset.checked_add(len).map_or(false, |end| end <= self.len),
            "region access {}+{} beyond mapping of {} bytes",
            offset,
            len,
            self.len
        );
    }

    pub fn read_bytes(&self, offset: usize, buf: &mut [u8]) {
        self.check(offset, buf.len());
        // SAFETY: bounds checked above; callers hold the lock covering this range.
        unsafe {
            ptr::copy_nonoverlapping(self.raw.as_ptr().add(offset), buf.as_mut_ptr(), buf.len());
        }
    }

    pub fn write_bytes(&self, offset: usize, data: &[u8]) {
        self.check(offset, data.len());
        // SAFETY: bounds checked above; callers hold the lock covering this range.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.raw.as_mut_ptr().add(offset), data.len());
        }
    }

    pub fn zero(&self, offset: usize, len: usize) {
        self.check(offset, len);
        // SAFETY: bounds checked above; callers hold the lock covering this range.
        unsafe {
            ptr::write_bytes(self.raw.as_mut_ptr().add(offset), 0, len);
        }
    }

    pub fn u32_at(&self, offset: usize) -> u32 {
        let mut buf = [0u8; 4];
        self.read_bytes(offset, &mut buf);
        u32::from_le_bytes(buf)
    }

    pub fn set_u32(&self, offset: usize, value: u32) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    pub fn u64_at(&self, offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        self.read_bytes(offset, &mut buf);
        u64::from_le_bytes(buf)
    }

    pub fn set_u64(&self, offset: usize, value: u64) {
        self.write_bytes(offset, &value.to_le_bytes());
    }
}

// SAFETY: the mapping is plain shared memory; every access goes through the
// region's lock discipline (growth lock, slot stripes, allocator lock).
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".creating.{}", std::process::id()));
    path.with_file_name(name)
}
