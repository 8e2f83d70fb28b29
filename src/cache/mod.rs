//! Fingerprint cache
//!
//! Content-addressed store of stage outcomes. The cache is process-wide and
//! shared by every run; it guarantees at most one concurrent computation per
//! fingerprint. Callers arriving while an entry is pending wait for it and
//! receive the same outcome.
//!
//! Failures are cached too: a failed outcome is replayed to every later
//! caller until the fingerprint changes (stage config version bump) or the
//! entry is explicitly invalidated.

mod fingerprint;

pub use fingerprint::Fingerprint;

use moka::future::Cache;
use moka::policy::EvictionPolicy;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup<T, E> {
    pub outcome: Result<T, E>,
    /// False only for the caller whose compute function actually ran
    pub hit: bool,
}

/// Hit/miss counters and entry count.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
}

impl CacheStats {
    /// Fraction of lookups served without computing; 0.0 when there were none.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Process-wide fingerprint-keyed cache of stage outcomes.
///
/// Entries only enter the underlying store once resolved, so a capacity
/// bound can never evict a pending computation.
pub struct FingerprintCache<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    inner: Cache<Fingerprint, Result<T, E>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T, E> FingerprintCache<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Unbounded cache: entries live for the rest of the process.
    pub fn unbounded() -> Self {
        Self::from_inner(Cache::builder().build())
    }

    /// Cache holding at most `max_entries` resolved entries, evicting least
    /// recently used ones first.
    pub fn bounded(max_entries: u64) -> Self {
        Self::from_inner(
            Cache::builder()
                .max_capacity(max_entries)
                .eviction_policy(EvictionPolicy::lru())
                .build(),
        )
    }

    /// Build from an optional capacity (`None` → unbounded).
    pub fn with_capacity(capacity: Option<u64>) -> Self {
        match capacity {
            Some(n) => Self::bounded(n),
            None => Self::unbounded(),
        }
    }

    fn from_inner(inner: Cache<Fingerprint, Result<T, E>>) -> Self {
        Self {
            inner,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return the cached outcome for `fingerprint`, computing it if absent.
    ///
    /// Concurrent calls for the same fingerprint are coalesced: `compute`
    /// runs at most once and every waiter receives its outcome.
    pub async fn get_or_compute<F, Fut>(&self, fingerprint: Fingerprint, compute: F) -> Lookup<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let entry = self
            .inner
            .entry(fingerprint)
            .or_insert_with(compute())
            .await;

        let hit = !entry.is_fresh();
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(fingerprint = %fingerprint.short(), "cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(fingerprint = %fingerprint.short(), "cache miss, computed");
        }

        Lookup {
            outcome: entry.into_value(),
            hit,
        }
    }

    /// Resolved outcome for `fingerprint`, if any. Does not touch the counters.
    pub async fn peek(&self, fingerprint: &Fingerprint) -> Option<Result<T, E>> {
        self.inner.get(fingerprint).await
    }

    /// Drop a resolved entry so the next request recomputes it.
    pub async fn invalidate(&self, fingerprint: &Fingerprint) {
        self.inner.invalidate(fingerprint).await;
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.run_pending_tasks().await;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.inner.entry_count(),
        }
    }
}

impl<T, E> Default for FingerprintCache<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    type TestCache = FingerprintCache<String, String>;

    fn fp(text: &str) -> Fingerprint {
        Fingerprint::compute(text, "transform/test", 1)
    }

    #[tokio::test]
    async fn second_lookup_is_a_hit() {
        let cache = TestCache::unbounded();
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_compute(fp("a"), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("A".to_string())
            })
            .await;
        assert!(!first.hit);
        assert_eq!(first.outcome, Ok("A".to_string()));

        let second = cache
            .get_or_compute(fp("a"), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("other".to_string())
            })
            .await;
        assert!(second.hit);
        assert_eq!(second.outcome, Ok("A".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn failures_are_replayed() {
        let cache = TestCache::unbounded();
        let failed = cache
            .get_or_compute(fp("bad"), || async { Err("rejected".to_string()) })
            .await;
        assert_eq!(failed.outcome, Err("rejected".to_string()));

        let replay = cache
            .get_or_compute(fp("bad"), || async { Ok("would succeed".to_string()) })
            .await;
        assert!(replay.hit);
        assert_eq!(replay.outcome, Err("rejected".to_string()));
    }

    #[tokio::test]
    async fn invalidate_forces_recompute() {
        let cache = TestCache::unbounded();
        cache
            .get_or_compute(fp("x"), || async { Err("boom".to_string()) })
            .await;
        cache.invalidate(&fp("x")).await;
        let again = cache
            .get_or_compute(fp("x"), || async { Ok("fine".to_string()) })
            .await;
        assert!(!again.hit);
        assert_eq!(again.outcome, Ok("fine".to_string()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_compute_once() {
        let cache = Arc::new(TestCache::unbounded());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(fp("shared"), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok::<_, String>("done".to_string())
                    })
                    .await
            }));
        }

        let mut misses = 0;
        for handle in handles {
            let lookup = handle.await.unwrap();
            assert_eq!(lookup.outcome, Ok("done".to_string()));
            if !lookup.hit {
                misses += 1;
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(misses, 1);
    }

    #[tokio::test]
    async fn bounded_cache_evicts_resolved_entries() {
        let cache = TestCache::bounded(2);
        for key in ["a", "b", "c", "d"] {
            cache
                .get_or_compute(fp(key), || async move { Ok(key.to_string()) })
                .await;
        }
        let stats = cache.stats().await;
        assert!(stats.entry_count <= 2);
    }
}
