use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::backend::CacheBackend;
use super::clock::{Clock, SystemClock};

/// Namespace prefix for every cache key.
const KEY_NAMESPACE: &str = "outreach";

/// Separator between key segments.
const KEY_DELIMITER: &str = ":";

/// Build a namespaced cache key from its segments.
pub fn make_key(parts: &[&str]) -> String {
    format!("{}{}{}", KEY_NAMESPACE, KEY_DELIMITER, parts.join(KEY_DELIMITER))
}

/// Freshness of a cache read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Younger than `max_age`.
    Fresh,
    /// Past `max_age` but inside the grace window; the old value is served
    /// while a refresh happens in the background.
    Stale,
    /// Absent, unreadable, or past the grace window.
    Miss,
}

impl std::fmt::Display for CacheState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheState::Fresh => write!(f, "fresh"),
            CacheState::Stale => write!(f, "stale"),
            CacheState::Miss => write!(f, "miss"),
        }
    }
}

/// Persisted form of a cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedData {
    /// Seconds since the Unix epoch.
    pub fetched_at: f64,
    pub data: Value,
}

impl CachedData {
    pub fn age_seconds(&self, now: f64) -> f64 {
        now - self.fetched_at
    }
}

/// Cache with stale-while-revalidate reads on top of a `CacheBackend`.
///
/// Backend failures never surface: reads degrade to `Miss` and writes to
/// no-ops. Clone is cheap and every clone shares the same backend.
#[derive(Clone)]
pub struct SwrCache {
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
    stale_multiplier: f64,
}

impl SwrCache {
    pub fn new(backend: Arc<dyn CacheBackend>, stale_multiplier: f64) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock), stale_multiplier)
    }

    pub fn with_clock(
        backend: Arc<dyn CacheBackend>,
        clock: Arc<dyn Clock>,
        stale_multiplier: f64,
    ) -> Self {
        Self {
            backend,
            clock,
            stale_multiplier,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn stale_multiplier(&self) -> f64 {
        self.stale_multiplier
    }

    /// Read `key`, classifying it against `max_age` seconds.
    pub async fn get(&self, key: &str, max_age: u64) -> (Option<Value>, CacheState) {
        let raw = match self.backend.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return (None, CacheState::Miss),
            Err(e) => {
                warn!(key = key, error = %e, "Cache read failed, treating as miss");
                return (None, CacheState::Miss);
            }
        };

        let cached: CachedData = match serde_json::from_slice(&raw) {
            Ok(cached) => cached,
            Err(e) => {
                debug!(key = key, error = %e, "Corrupt cache entry, treating as miss");
                return (None, CacheState::Miss);
            }
        };

        let age = cached.age_seconds(self.clock.now());
        let state = self.classify(age, max_age);
        debug!(key = key, age = age, state = %state, "Cache lookup");

        match state {
            CacheState::Miss => (None, CacheState::Miss),
            state => (Some(cached.data), state),
        }
    }

    /// Store `value` under `key`, stamped with the current time.
    ///
    /// The physical expiry is `ttl × stale_multiplier`, so the entry outlives
    /// its freshness by the grace window and is then reclaimed by the backend.
    pub async fn set(&self, key: &str, value: &Value, ttl: u64) {
        let cached = CachedData {
            fetched_at: self.clock.now(),
            data: value.clone(),
        };
        let bytes = match serde_json::to_vec(&cached) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to serialize cache entry");
                return;
            }
        };

        let expire = self.physical_ttl(ttl);
        if let Err(e) = self.backend.set_with_expiry(key, bytes, expire).await {
            warn!(key = key, error = %e, "Cache write failed, continuing uncached");
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Err(e) = self.backend.delete(key).await {
            warn!(key = key, error = %e, "Cache delete failed");
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        match self.backend.exists(key).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(key = key, error = %e, "Cache exists check failed");
                false
            }
        }
    }

    /// Whether the backend is reachable right now.
    pub async fn ping(&self) -> bool {
        match self.backend.ping().await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Cache backend ping failed");
                false
            }
        }
    }

    fn classify(&self, age: f64, max_age: u64) -> CacheState {
        let max_age = max_age as f64;
        if age <= max_age {
            CacheState::Fresh
        } else if age <= max_age * self.stale_multiplier {
            CacheState::Stale
        } else {
            CacheState::Miss
        }
    }

    fn physical_ttl(&self, ttl: u64) -> u64 {
        ((ttl as f64 * self.stale_multiplier) as u64).max(1)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ManualClock, MemoryBackend};
    use serde_json::json;

    fn cache_with_clock(multiplier: f64) -> (SwrCache, Arc<ManualClock>, Arc<MemoryBackend>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000.0));
        let backend = Arc::new(MemoryBackend::with_clock(clock.clone()));
        let cache = SwrCache::with_clock(backend.clone(), clock.clone(), multiplier);
        (cache, clock, backend)
    }

    #[test]
    fn test_make_key() {
        assert_eq!(make_key(&["user", "Alice"]), "outreach:user:Alice");
        assert_eq!(
            make_key(&["course_users", "School/Title"]),
            "outreach:course_users:School/Title"
        );
    }

    #[tokio::test]
    async fn test_get_after_set_is_fresh() {
        let (cache, _, _) = cache_with_clock(2.0);
        cache.set("k", &json!({"a": 1}), 100).await;
        assert_eq!(cache.get("k", 100).await, (Some(json!({"a": 1})), CacheState::Fresh));
    }

    #[tokio::test]
    async fn test_missing_key_is_miss() {
        let (cache, _, _) = cache_with_clock(2.0);
        assert_eq!(cache.get("nope", 100).await, (None, CacheState::Miss));
    }

    #[tokio::test]
    async fn test_age_boundaries() {
        let (cache, clock, _) = cache_with_clock(2.0);
        cache.set("k", &json!("v"), 100).await;

        clock.advance(100.0);
        assert_eq!(cache.get("k", 100).await.1, CacheState::Fresh);

        clock.advance(0.5);
        assert_eq!(cache.get("k", 100).await, (Some(json!("v")), CacheState::Stale));

        clock.advance(99.5);
        assert_eq!(cache.get("k", 100).await.1, CacheState::Stale);

        clock.advance(0.5);
        assert_eq!(cache.get("k", 100).await, (None, CacheState::Miss));
    }

    #[tokio::test]
    async fn test_course_scenario() {
        let (cache, clock, _) = cache_with_clock(2.0);
        let key = "course:1";
        cache.set(key, &json!({"a": 1}), 100).await;
        assert_eq!(cache.get(key, 100).await, (Some(json!({"a": 1})), CacheState::Fresh));

        clock.advance(150.0);
        assert_eq!(cache.get(key, 100).await, (Some(json!({"a": 1})), CacheState::Stale));

        clock.advance(100.0);
        assert_eq!(cache.get(key, 100).await, (None, CacheState::Miss));
    }

    #[tokio::test]
    async fn test_logically_expired_entry_still_present_is_miss() {
        let (cache, clock, backend) = cache_with_clock(2.0);
        // Written with a long physical expiry, read with a short max_age
        cache.set("k", &json!(1), 1_000).await;
        clock.advance(250.0);

        assert!(backend.exists("k").await.unwrap());
        assert_eq!(cache.get("k", 100).await, (None, CacheState::Miss));
    }

    #[tokio::test]
    async fn test_physical_expiry_is_ttl_times_multiplier() {
        let (cache, clock, backend) = cache_with_clock(2.0);
        cache.set("k", &json!(1), 100).await;

        clock.advance(199.0);
        assert!(backend.exists("k").await.unwrap());
        clock.advance(2.0);
        assert!(!backend.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_miss_and_heals() {
        let (cache, _, backend) = cache_with_clock(2.0);
        backend
            .set_with_expiry("k", b"{not json".to_vec(), 100)
            .await
            .unwrap();
        assert_eq!(cache.get("k", 100).await, (None, CacheState::Miss));

        // Wrong shape is corrupt too
        backend
            .set_with_expiry("k", br#"{"data": 1}"#.to_vec(), 100)
            .await
            .unwrap();
        assert_eq!(cache.get("k", 100).await, (None, CacheState::Miss));

        cache.set("k", &json!(7), 100).await;
        assert_eq!(cache.get("k", 100).await, (Some(json!(7)), CacheState::Fresh));
    }

    #[tokio::test]
    async fn test_backend_down_degrades_to_passthrough() {
        let (cache, _, backend) = cache_with_clock(2.0);
        cache.set("k", &json!(1), 100).await;

        backend.disconnect();
        assert_eq!(cache.get("k", 100).await, (None, CacheState::Miss));
        cache.set("k", &json!(2), 100).await;
        assert!(!cache.exists("k").await);
        assert!(!cache.ping().await);

        // The write while down was dropped
        backend.connect();
        assert_eq!(cache.get("k", 100).await.0, Some(json!(1)));
        assert!(cache.ping().await);
    }

    #[tokio::test]
    async fn test_wire_format() {
        let (cache, clock, backend) = cache_with_clock(2.0);
        cache.set("k", &json!({"nested": [1, 2]}), 10).await;

        let raw = backend.get("k").await.unwrap().unwrap();
        let wire: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(wire["data"], json!({"nested": [1, 2]}));
        assert_eq!(wire["fetched_at"].as_f64(), Some(clock.now()));
        assert_eq!(wire.as_object().map(|o| o.len()), Some(2));
    }

    #[tokio::test]
    async fn test_refresh_never_back_dates() {
        let (cache, clock, backend) = cache_with_clock(2.0);
        cache.set("k", &json!(1), 100).await;
        let first: CachedData =
            serde_json::from_slice(&backend.get("k").await.unwrap().unwrap()).unwrap();

        clock.advance(30.0);
        cache.set("k", &json!(2), 100).await;
        let second: CachedData =
            serde_json::from_slice(&backend.get("k").await.unwrap().unwrap()).unwrap();

        assert!(second.fetched_at >= first.fetched_at);
    }

    #[tokio::test]
    async fn test_delete() {
        let (cache, _, _) = cache_with_clock(2.0);
        cache.set("k", &json!(1), 100).await;
        cache.delete("k").await;
        assert_eq!(cache.get("k", 100).await.1, CacheState::Miss);
    }
}
