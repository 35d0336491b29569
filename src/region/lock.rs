//! Shared locks
//!
//! Two layers cooperate on every lock:
//! - a process-local `parking_lot::RwLock`, which orders the threads of
//!   this process
//! - an advisory `fcntl` byte-range lock on the backing file, which orders
//!   processes (only for file-backed regions on unix)
//!
//! POSIX record locks belong to the process, not the thread, and a single
//! unlock drops them no matter how many threads "took" them. Shared file
//! locks are therefore reference-counted: the first local reader takes the
//! file lock, the last one releases it.
//!
//! Lock bytes live at `LOCK_BASE` and above, far past any region data.

use std::fs::File;
use std::io;
use std::ops::Deref;
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Result, ShmkvError};

pub(crate) const LOCK_BASE: u64 = 1 << 40;

/// Area-growth lock byte
pub(crate) const GROWTH_LOCK: u64 = LOCK_BASE;

/// Free-list (allocator) lock byte
pub(crate) const ALLOC_LOCK: u64 = LOCK_BASE + 1;

/// First collision-slot stripe lock byte
pub(crate) const STRIPE_LOCK_BASE: u64 = LOCK_BASE + 64;

// =============================================================================
// File Range Lock
// =============================================================================

/// One lockable byte of the backing file (no-op for anonymous regions)
#[derive(Clone)]
pub(crate) struct FileRange {
    file: Option<Arc<File>>,
    offset: u64,
}

#[derive(Clone, Copy)]
enum LockKind {
    Shared,
    Exclusive,
    Unlock,
}

impl FileRange {
    pub fn new(file: Option<Arc<File>>, offset: u64) -> Self {
        Self { file, offset }
    }

    pub fn shared(&self) -> Result<()> {
        self.apply(LockKind::Shared)
    }

    pub fn exclusive(&self) -> Result<()> {
        self.apply(LockKind::Exclusive)
    }

    pub fn unlock(&self) -> Result<()> {
        self.apply(LockKind::Unlock)
    }

    fn apply(&self, kind: LockKind) -> Result<()> {
        match &self.file {
            Some(file) => fcntl_lock(file, self.offset, kind).map_err(|e| {
                ShmkvError::Lock(format!("fcntl lock at byte {} failed: {}", self.offset, e))
            }),
            None => Ok(()),
        }
    }
}

#[cfg(unix)]
fn fcntl_lock(file: &File, offset: u64, kind: LockKind) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let l_type = match kind {
        LockKind::Shared => libc::F_RDLCK,
        LockKind::Exclusive => libc::F_WRLCK,
        LockKind::Unlock => libc::F_UNLCK,
    };

    // SAFETY: flock is a plain C struct; all-zero is a valid value.
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = l_type as libc::c_short;
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    fl.l_start = offset as libc::off_t;
    fl.l_len = 1;

    loop {
        // SAFETY: the descriptor is owned by `file` and `fl` outlives the call.
        let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLKW, &mut fl as *mut libc::flock) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(unix))]
fn fcntl_lock(_file: &File, _offset: u64, _kind: LockKind) -> io::Result<()> {
    Ok(())
}

// =============================================================================
// Shared Lock
// =============================================================================

/// A reader/writer lock that excludes both threads and processes
pub(crate) struct SharedLock<T> {
    local: RwLock<T>,
    readers: Mutex<u32>,
    range: FileRange,
}

impl<T> SharedLock<T> {
    pub fn new(value: T, range: FileRange) -> Self {
        Self {
            local: RwLock::new(value),
            readers: Mutex::new(0),
            range,
        }
    }

    /// Acquire shared access (blocks)
    pub fn read(&self) -> Result<SharedReadGuard<'_, T>> {
        let guard = self.local.read();
        {
            let mut readers = self.readers.lock();
            if *readers == 0 {
                self.range.shared()?;
            }
            *readers += 1;
        }
        Ok(SharedReadGuard { guard, lock: self })
    }

    /// Acquire exclusive access (blocks)
    pub fn write(&self) -> Result<SharedWriteGuard<'_, T>> {
        let guard = self.local.write();
        self.range.exclusive()?;
        Ok(SharedWriteGuard { guard, lock: self })
    }

    fn release_shared(&self) {
        let mut readers = self.readers.lock();
        *readers -= 1;
        if *readers == 0 {
            if let Err(e) = self.range.unlock() {
                tracing::warn!(error = %e, "failed to release shared file lock");
            }
        }
    }

    fn release_exclusive(&self) {
        if let Err(e) = self.range.unlock() {
            tracing::warn!(error = %e, "failed to release exclusive file lock");
        }
    }
}

/// Shared access to a `SharedLock`
pub(crate) struct SharedReadGuard<'a, T> {
    guard: RwLockReadGuard<'a, T>,
    lock: &'a SharedLock<T>,
}

impl<T> Deref for SharedReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> Drop for SharedReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_shared();
    }
}

/// Exclusive access to a `SharedLock`
pub(crate) struct SharedWriteGuard<'a, T> {
    guard: RwLockWriteGuard<'a, T>,
    lock: &'a SharedLock<T>,
}

impl<T> Deref for SharedWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> std::ops::DerefMut for SharedWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for SharedWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_exclusive();
    }
}

// =============================================================================
// Collision Slot Stripes
// =============================================================================

/// Striped locks covering the collision slots
///
/// Slot `s` is guarded by stripe `s % stripes`. The stripe count is fixed
/// in the region header so every attached process agrees on it.
pub(crate) struct LockTable {
    stripes: Vec<CachePadded<SharedLock<()>>>,
}

impl LockTable {
    pub fn new(count: u32, file: Option<Arc<File>>) -> Self {
        let stripes = (0..count as u64)
            .map(|i| {
                CachePadded::new(SharedLock::new(
                    (),
                    FileRange::new(file.clone(), STRIPE_LOCK_BASE + i),
                ))
            })
            .collect();
        Self { stripes }
    }

    pub fn stripe_of(&self, slot: u32) -> usize {
        slot as usize % self.stripes.len()
    }

    /// Lock one slot for lookup
    pub fn read(&self, slot: u32) -> Result<SharedReadGuard<'_, ()>> {
        self.stripes[self.stripe_of(slot)].read()
    }

    /// Lock one slot for insert/remove
    pub fn write(&self, slot: u32) -> Result<SharedWriteGuard<'_, ()>> {
        self.stripes[self.stripe_of(slot)].write()
    }

    /// Lock several slots for one compound update
    ///
    /// Stripes are taken once each, in ascending order, so two compound
    /// updates can never wait on each other in a cycle.
    pub fn write_many(&self, slots: &[u32]) -> Result<Vec<SharedWriteGuard<'_, ()>>> {
        let mut stripes: Vec<usize> = slots.iter().map(|&s| self.stripe_of(s)).collect();
        stripes.sort_unstable();
        stripes.dedup();

        let mut guards = Vec::with_capacity(stripes.len());
        for stripe in stripes {
            guards.push(self.stripes[stripe].write()?);
        }
        Ok(guards)
    }
}
