//! # shmkv
//!
//! An embeddable key/value store living in one memory-mapped region that
//! several processes can attach to at once:
//! - Extendible hash index that grows without moving stored data
//! - Element and page pools with free lists inside the region
//! - Subkeys and attributes (expiry, modification time) per key
//! - FIFO/LIFO queues built from ordinary keys
//! - Hash-range scans and last-writer-wins merges for replication
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Queue Engine            Range Sync Engine           │
//! │     (push / pop / drain)       (scan_by_hash / merge)        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Store                                 │
//! │        (key ops, attribute hook, growth, stats)              │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ Bucket Index│          │  Elements   │
//!   │  + Slots    │─────────▶│  + Pages    │
//!   └──────┬──────┘          └──────┬──────┘
//!          │                        │
//!          ▼                        ▼
//!   ┌──────────────────────────────────────┐
//!   │  Region (mmap + fcntl range locks)   │
//!   └──────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod hash;
pub mod attrs;
pub mod codec;

mod region;
mod index;
mod element;
mod page;

pub mod store;
pub mod sync;
pub mod queue;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ErrorCategory, Result, ShmkvError};
pub use config::{Config, ConfigBuilder, OpenMode, MAX_BIT_DEPTH, MAX_COLLISION_BITS};
pub use hash::{HashFn, KeyHash};
pub use attrs::{
    now_millis, AttributeHook, Attributes, PlainAttributes, StandardAttributes, EXPIRES_ATTR,
    MTIME_ATTR,
};
pub use codec::SerializedElement;
pub use store::{RegionStats, Store};
pub use sync::{HashRange, MergeOutcome, ScanRequest, ScanResult, TimeWindow};
pub use queue::{Decision, Flow, Queue, QueueOrder, QueuePosition, RemoveCursor, Verdict};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of shmkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
