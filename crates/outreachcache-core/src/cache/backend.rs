use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use super::clock::{Clock, SystemClock};

/// Backends sweep out expired entries once every this many writes.
pub const SWEEP_EVERY_WRITES: u64 = 128;

/// Count a write against `counter`, returning true when a sweep is due.
pub(crate) fn sweep_due(counter: &AtomicU64) -> bool {
    (counter.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY_WRITES == 0
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key/value store the SWR cache sits on.
///
/// Keys are opaque strings; values are opaque bytes. Entries past their
/// expiry must no longer be returned, and must eventually be reclaimed
/// without anyone reading them again.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    async fn set_with_expiry(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl_seconds: u64,
    ) -> Result<(), BackendError>;

    async fn delete(&self, key: &str) -> Result<(), BackendError>;

    async fn exists(&self, key: &str) -> Result<bool, BackendError>;

    /// Cheap reachability check for health reporting.
    async fn ping(&self) -> Result<(), BackendError>;

    /// Remove every entry past its expiry, returning how many were dropped.
    async fn purge_expired(&self) -> Result<usize, BackendError>;
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: f64,
}

/// In-process backend with per-entry expiry.
///
/// Expired entries are dropped lazily when read, and in bulk every
/// `SWEEP_EVERY_WRITES` writes or through `purge_expired`. `disconnect`
/// makes every call fail until `connect`, which is how a lost connection to
/// a remote store looks to the cache.
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    clock: Arc<dyn Clock>,
    connected: AtomicBool,
    writes: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            connected: AtomicBool::new(true),
            writes: AtomicU64::new(0),
        }
    }

    pub fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Number of physically stored entries, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn ensure_connected(&self) -> Result<(), BackendError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable("memory backend disconnected".to_string()))
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        self.ensure_connected()?;
        let now = self.clock.now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        // Expired: reclaim it
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
            debug!(key = key, "Reclaimed expired entry");
        }
        Ok(None)
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl_seconds: u64,
    ) -> Result<(), BackendError> {
        self.ensure_connected()?;
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        if sweep_due(&self.writes) {
            let reclaimed = retain_live(&mut entries, now);
            debug!(reclaimed = reclaimed, "Swept expired entries");
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: now + ttl_seconds as f64,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.ensure_connected()?;
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        self.ensure_connected()?;
        let now = self.clock.now();
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .is_some_and(|e| e.expires_at > now))
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.ensure_connected()
    }

    async fn purge_expired(&self) -> Result<usize, BackendError> {
        self.ensure_connected()?;
        let now = self.clock.now();
        Ok(retain_live(&mut *self.entries.write().await, now))
    }
}

fn retain_live(entries: &mut HashMap<String, MemoryEntry>, now: f64) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.expires_at > now);
    before - entries.len()
}

// ============================================================================
// Tests
// ============================================================================
