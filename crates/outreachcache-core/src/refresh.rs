//! Background revalidation of stale cache entries.
//!
//! The `RefreshCoordinator` owns the set of keys currently being refreshed
//! and guarantees at most one in-flight refresh per key. It is constructed
//! once and cloned into every request-handling context.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, warn};

use crate::cache::SwrCache;

struct Inner {
    cache: SwrCache,
    pending: Mutex<HashSet<String>>,
    /// Bounds concurrent refresh fetches; `None` means unbounded.
    limiter: Option<Semaphore>,
    idle: Notify,
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, HashSet<String>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes the key from the pending set when the refresh task ends,
/// however it ends.
struct PendingGuard {
    inner: Arc<Inner>,
    key: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.inner.pending().remove(&self.key);
        self.inner.idle.notify_waiters();
    }
}

/// Coordinates fire-and-forget refreshes. Clone is cheap and shares state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    /// Coordinator with no bound on concurrent refreshes.
    pub fn new(cache: SwrCache) -> Self {
        Self::with_max_concurrent(cache, 0)
    }

    /// Coordinator running at most `max_concurrent` refresh fetches at once
    /// (0 = unbounded). Refreshes beyond the bound wait their turn and keep
    /// their key marked pending while they wait.
    pub fn with_max_concurrent(cache: SwrCache, max_concurrent: usize) -> Self {
        let limiter = (max_concurrent > 0).then(|| Semaphore::new(max_concurrent));
        Self {
            inner: Arc::new(Inner {
                cache,
                pending: Mutex::new(HashSet::new()),
                limiter,
                idle: Notify::new(),
            }),
        }
    }

    /// Refresh `key` in the background by calling `fetch` and writing the
    /// result with `ttl`.
    ///
    /// Returns immediately. Returns `false` without doing anything when a
    /// refresh for `key` is already in flight. Fetch failures are logged and
    /// dropped; the stale entry stays until it ages out. Must be called from
    /// within a tokio runtime.
    pub fn schedule<F, Fut>(&self, key: impl Into<String>, fetch: F, ttl: u64) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let key = key.into();
        if !self.inner.pending().insert(key.clone()) {
            debug!(key = %key, "Refresh already pending, skipping");
            return false;
        }

        let guard = PendingGuard {
            inner: Arc::clone(&self.inner),
            key,
        };
        tokio::spawn(async move {
            let inner = Arc::clone(&guard.inner);
            let _permit = match &inner.limiter {
                Some(limiter) => match limiter.acquire().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };

            debug!(key = %guard.key, "Background refresh started");
            match fetch().await {
                Ok(value) => {
                    inner.cache.set(&guard.key, &value, ttl).await;
                    debug!(key = %guard.key, "Background refresh stored");
                }
                Err(e) => {
                    warn!(key = %guard.key, error = %e, "Background refresh failed");
                }
            }
            // guard drops here, clearing the pending mark
        });
        true
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.inner.pending().contains(key)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending().len()
    }

    /// Wait until no refresh is pending.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.pending_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheState, MemoryBackend};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn cache() -> SwrCache {
        SwrCache::new(Arc::new(MemoryBackend::new()), 2.0)
    }

    #[tokio::test]
    async fn test_refresh_writes_result() {
        let cache = cache();
        let coordinator = RefreshCoordinator::new(cache.clone());

        assert!(coordinator.schedule("k", || async { anyhow::Ok(json!({"fresh": true})) }, 60));
        coordinator.wait_idle().await;

        assert_eq!(
            cache.get("k", 60).await,
            (Some(json!({"fresh": true})), CacheState::Fresh)
        );
        assert!(!coordinator.is_pending("k"));
    }

    #[tokio::test]
    async fn test_concurrent_schedules_fetch_once() {
        let coordinator = RefreshCoordinator::new(cache());
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let counter = Arc::clone(&calls);
        let first = coordinator.schedule(
            "k",
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = release_rx.await;
                anyhow::Ok(json!(1))
            },
            60,
        );

        let counter = Arc::clone(&calls);
        let second = coordinator.schedule(
            "k",
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(json!(2))
            },
            60,
        );

        assert!(first);
        assert!(!second);
        assert!(coordinator.is_pending("k"));

        let _ = release_tx.send(());
        coordinator.wait_idle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_stale_value_and_clears_pending() {
        let cache = cache();
        cache.set("k", &json!("old"), 60).await;
        let coordinator = RefreshCoordinator::new(cache.clone());

        coordinator.schedule(
            "k",
            || async { Err::<Value, _>(anyhow::anyhow!("upstream down")) },
            60,
        );
        coordinator.wait_idle().await;

        assert_eq!(cache.get("k", 60).await.0, Some(json!("old")));
        assert_eq!(coordinator.pending_count(), 0);

        // A later refresh for the same key is accepted again
        assert!(coordinator.schedule("k", || async { anyhow::Ok(json!("new")) }, 60));
        coordinator.wait_idle().await;
        assert_eq!(cache.get("k", 60).await.0, Some(json!("new")));
    }

    #[tokio::test]
    async fn test_panicking_refresh_clears_pending() {
        let coordinator = RefreshCoordinator::new(cache());
        coordinator.schedule(
            "k",
            || async {
                if true {
                    panic!("fetch exploded");
                }
                anyhow::Ok(json!(null))
            },
            60,
        );
        coordinator.wait_idle().await;
        assert!(!coordinator.is_pending("k"));
    }

    #[tokio::test]
    async fn test_distinct_keys_refresh_independently() {
        let coordinator = RefreshCoordinator::new(cache());
        assert!(coordinator.schedule("a", || async { anyhow::Ok(json!(1)) }, 60));
        assert!(coordinator.schedule("b", || async { anyhow::Ok(json!(2)) }, 60));
        coordinator.wait_idle().await;
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_bounded_refreshes_run_one_at_a_time() {
        let coordinator = RefreshCoordinator::with_max_concurrent(cache(), 1);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for key in ["a", "b", "c"] {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            coordinator.schedule(
                key,
                move || async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    anyhow::Ok(json!(key))
                },
                60,
            );
        }

        assert_eq!(coordinator.pending_count(), 3);
        coordinator.wait_idle().await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
