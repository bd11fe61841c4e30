//! Stale-while-revalidate caching module.
//!
//! This module provides the `SwrCache` for storing and retrieving upstream
//! payloads. Every entry carries the time it was fetched; a read reports
//! whether the entry is fresh, stale but still servable, or missing.
//!
//! Backing stores implement `CacheBackend`:
//! - `MemoryBackend`: process-local, used by long-running hosts and tests
//! - `FileBackend`: one JSON file per key, survives restarts

pub mod backend;
pub mod clock;
pub mod file;
pub mod store;

pub use backend::{BackendError, CacheBackend, MemoryBackend, SWEEP_EVERY_WRITES};
pub use clock::{Clock, ManualClock, SystemClock};
pub use file::FileBackend;
pub use store::{make_key, CacheState, CachedData, SwrCache};
