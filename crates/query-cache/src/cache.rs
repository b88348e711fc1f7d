//! `QueryCache`: the keyed registry, prefix invalidation, and
//! deferred change notification.

use crate::disposer::Disposer;
use crate::fetcher::Fetcher;
use crate::observer::{ChangeObserver, RegistryVersion};
use crate::query::{BoxFetchFn, Query};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use query_cache_core::{
    EvictionReason, LookupOutcome, NoopMetrics, QueryCacheMetrics, QueryKey, QueryOptions,
};
use query_cache_timer::{TimerWheel, WheelDriver};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Object-safe lifecycle operations the registry can perform on a
/// `Query<T>` without knowing `T`. Implemented by `Query<T>` itself
/// (see `crate::query`); the registry stores `Arc<dyn QueryLifecycle>`
/// alongside an `Arc<dyn Any + Send + Sync>` built from the same
/// `Arc<Query<T>>`, so both trait objects share one allocation.
pub(crate) trait QueryLifecycle: Send + Sync {
    fn key(&self) -> &QueryKey;
    fn invalidate_erased(&self);
    fn destroy_erased(&self, reason: EvictionReason);
    fn is_static_exempt(&self) -> bool;
}

#[derive(Clone)]
struct RegistryEntry {
    any: Arc<dyn Any + Send + Sync>,
    lifecycle: Arc<dyn QueryLifecycle>,
}

struct Inner {
    registry: DashMap<QueryKey, RegistryEntry>,
    wheel: Arc<TimerWheel>,
    observers: Mutex<Vec<(u64, Arc<dyn ChangeObserver>)>>,
    next_observer_id: AtomicU64,
    version: AtomicU64,
    notify_pending: AtomicBool,
    metrics: Arc<dyn QueryCacheMetrics>,
}

impl Inner {
    /// Bump the registry version and, unless a notification is
    /// already pending for this task, schedule one deferred-by-one-
    /// task delivery. Several mutations issued back-to-back collapse
    /// into a single `on_change` call carrying the latest version.
    fn bump_and_notify(self: &Arc<Self>) {
        self.version.fetch_add(1, Ordering::AcqRel);
        if self.notify_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            this.notify_pending.store(false, Ordering::Release);
            let version = RegistryVersion(this.version.load(Ordering::Acquire));
            let observers = this.observers.lock().clone();
            for (_, observer) in observers {
                observer.on_change(version);
            }
        });
    }
}

/// The query registry: a canonical-key-addressed map from key to
/// `Query<T>`, type-erased internally and projected back to typed
/// views at the API boundary. Cheap to clone — every clone shares the
/// same registry.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide timer wheel shared by every `QueryCache::new()`:
/// created lazily at first use, with a single background driver task
/// that outlives every cache built on it. Callers who want an isolated
/// wheel (tests, alternate tick configuration) should use
/// [`QueryCache::with_wheel`] instead and own the wheel's driver
/// themselves.
fn shared_wheel() -> Arc<TimerWheel> {
    static SHARED: OnceLock<(Arc<TimerWheel>, WheelDriver)> = OnceLock::new();
    SHARED
        .get_or_init(|| {
            let wheel = TimerWheel::with_defaults();
            let driver = WheelDriver::spawn(wheel.clone());
            (wheel, driver)
        })
        .0
        .clone()
}

impl QueryCache {
    /// A cache backed by the process-wide shared [`TimerWheel`]
    /// (lazily created and driven on first use).
    pub fn new() -> Self {
        Self::with_wheel(shared_wheel())
    }

    /// A cache backed by a specific, possibly shared, timer wheel — the
    /// same wheel can drive GC and retry scheduling for several
    /// `QueryCache` instances at once. The caller is responsible for
    /// driving `wheel` (e.g. with a [`WheelDriver`], or by calling
    /// `advance()` directly in tests). Metrics are a no-op; use
    /// [`QueryCache::with_wheel_and_metrics`] to record them.
    pub fn with_wheel(wheel: Arc<TimerWheel>) -> Self {
        Self::with_wheel_and_metrics(wheel, Arc::new(NoopMetrics))
    }

    /// A cache backed by a specific timer wheel and reporting lookups,
    /// evictions, and registry size to `metrics`.
    pub fn with_wheel_and_metrics(wheel: Arc<TimerWheel>, metrics: Arc<dyn QueryCacheMetrics>) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: DashMap::new(),
                wheel,
                observers: Mutex::new(Vec::new()),
                next_observer_id: AtomicU64::new(0),
                version: AtomicU64::new(0),
                notify_pending: AtomicBool::new(false),
                metrics,
            }),
        }
    }

    /// Look the key up; on a miss, build a new `Query<T>` with
    /// `fetcher` and `options`, kick off its initial fetch, and insert
    /// it. On a hit, return the existing `Query` **unchanged** —
    /// `options`/`fetcher` supplied here are ignored: first creation
    /// wins, there is no merge-on-hit.
    ///
    /// # Panics
    /// Panics if `key` was already `acquire`d with a different `T`.
    /// The registry has one entry per canonical key; reusing a key
    /// across value types is a programmer error.
    pub fn acquire<T, F>(&self, key: QueryKey, fetcher: F, options: QueryOptions) -> Arc<Query<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: Fetcher<T>,
    {
        match self.inner.registry.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                self.inner.metrics.record_lookup(&key_str(&key), LookupOutcome::Hit);
                occupied
                    .get()
                    .any
                    .clone()
                    .downcast::<Query<T>>()
                    .unwrap_or_else(|_| {
                        panic!("query-cache: acquire called with a different value type for an existing key")
                    })
            }
            Entry::Vacant(vacant) => {
                self.inner.metrics.record_lookup(&key_str(&key), LookupOutcome::Miss);
                let fetcher = Arc::new(fetcher);
                let fetch_fn: BoxFetchFn<T> = Arc::new(move |k: QueryKey| {
                    let fetcher = fetcher.clone();
                    Box::pin(async move { fetcher.fetch(k).await.map_err(|e| e.to_string()) })
                });

                let inner = self.inner.clone();
                let on_destroy: Arc<dyn Fn(&QueryKey, EvictionReason) + Send + Sync> =
                    Arc::new(move |key: &QueryKey, reason: EvictionReason| {
                        inner.registry.remove(key);
                        inner.metrics.record_eviction(&key_str(key), reason);
                        inner.metrics.record_registry_size(inner.registry.len());
                        inner.bump_and_notify();
                    });

                let query = Query::new(key, fetch_fn, options, self.inner.wheel.clone(), on_destroy);
                let any: Arc<dyn Any + Send + Sync> = query.clone();
                let lifecycle: Arc<dyn QueryLifecycle> = query.clone();
                vacant.insert(RegistryEntry { any, lifecycle });

                self.inner.metrics.record_registry_size(self.inner.registry.len());
                query.begin_initial_fetch();
                self.inner.bump_and_notify();
                query
            }
        }
    }

    /// Canonical lookup without constructing anything. `None` on a
    /// miss, or if `key` exists but was `acquire`d with a different
    /// `T`.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &QueryKey) -> Option<Arc<Query<T>>> {
        let entry = self.inner.registry.get(key)?;
        entry.any.clone().downcast::<Query<T>>().ok()
    }

    /// Canonical lookup that doesn't materialize a typed view.
    pub fn has(&self, key: &QueryKey) -> bool {
        self.inner.registry.contains_key(key)
    }

    /// Mark every query whose canonical key is prefix-matched by
    /// `prefix` as stale, **without removing it** from the registry.
    /// Queries with `staleTime = "static"` are exempt.
    pub fn invalidate(&self, prefix: &QueryKey) {
        for entry in self.inner.registry.iter() {
            if prefix.is_prefix_of(entry.key()) && !entry.value().lifecycle.is_static_exempt() {
                entry.value().lifecycle.invalidate_erased();
            }
        }
    }

    /// Destroy every query and empty the registry.
    pub fn clear(&self) {
        let entries: Vec<RegistryEntry> = self
            .inner
            .registry
            .iter()
            .map(|r| r.value().clone())
            .collect();
        self.inner.registry.clear();
        for entry in entries {
            entry.lifecycle.destroy_erased(EvictionReason::Cleared);
        }
        self.inner.metrics.record_registry_size(0);
        self.inner.bump_and_notify();
    }

    /// Number of queries currently in the registry.
    pub fn len(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.registry.is_empty()
    }

    /// Subscribe to registry-membership changes, delivered at most
    /// once per task after one or more mutations.
    pub fn on_change(&self, observer: impl ChangeObserver) -> Disposer {
        let id = self.inner.next_observer_id.fetch_add(1, Ordering::Relaxed);
        let observer: Arc<dyn ChangeObserver> = Arc::new(observer);
        self.inner.observers.lock().push((id, observer));

        let inner = self.inner.clone();
        Disposer::new(move || {
            inner.observers.lock().retain(|(oid, _)| *oid != id);
        })
    }
}

fn key_str(key: &QueryKey) -> String {
    key.atoms()
        .iter()
        .map(|a| a.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use query_cache_core::KeyAtom;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn key(s: &str) -> QueryKey {
        QueryKey::of(s)
    }

    // Each test builds its own wheel and driver rather than going
    // through `QueryCache::new()`'s process-wide shared one: a
    // background driver spawned on one #[tokio::test]'s runtime stops
    // running once that runtime shuts down, which would starve GC
    // timers in every test that runs after the first.
    fn test_cache() -> (QueryCache, WheelDriver) {
        let wheel = TimerWheel::new(query_cache_timer::TimerWheelConfig {
            tick_duration: Duration::from_millis(1),
            ..query_cache_timer::TimerWheelConfig::default()
        });
        let driver = WheelDriver::spawn(wheel.clone());
        (QueryCache::with_wheel(wheel), driver)
    }

    async fn settle<T: Clone + Send + Sync + 'static>(q: &Arc<Query<T>>) {
        for _ in 0..200 {
            if !matches!(
                q.state().status,
                crate::query::QueryStatus::Pending
            ) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn acquire_on_miss_then_hit_returns_same_query() {
        let (cache, _driver) = test_cache();
        let q1 = cache.acquire(key("u"), |_k| async { Ok::<_, String>("A".to_string()) }, QueryOptions::default());
        let q2 = cache.acquire(key("u"), |_k| async { Ok::<_, String>("ignored".to_string()) }, QueryOptions::default());
        assert!(Arc::ptr_eq(&q1, &q2));
    }

    #[tokio::test]
    async fn deduplicates_concurrent_acquire_calls() {
        let (cache, _driver) = test_cache();
        let calls = Arc::new(AtomicU32::new(0));
        let make = |calls: Arc<AtomicU32>| {
            move |_k: QueryKey| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, String>("X".to_string())
                }
            }
        };
        let q1 = cache.acquire(key("k"), make(calls.clone()), QueryOptions::default());
        let q2 = cache.acquire(key("k"), make(calls.clone()), QueryOptions::default());
        let q3 = cache.acquire(key("k"), make(calls.clone()), QueryOptions::default());

        assert!(Arc::ptr_eq(&q1, &q2));
        assert!(Arc::ptr_eq(&q2, &q3));
        settle(&q1).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn prefix_invalidation_exempts_static() {
        let (cache, _driver) = test_cache();
        let root = cache.acquire(
            QueryKey::new([KeyAtom::new("m")]),
            |_k| async { Ok::<_, String>(1u32) },
            QueryOptions::default(),
        );
        let child = cache.acquire(
            QueryKey::new([KeyAtom::new("m"), KeyAtom::new("a")]),
            |_k| async { Ok::<_, String>(2u32) },
            QueryOptions::default(),
        );
        let static_child = cache.acquire(
            QueryKey::new([KeyAtom::new("m"), KeyAtom::new("b")]),
            |_k| async { Ok::<_, String>(3u32) },
            query_cache_core::QueryOpts::new().stale_static().build(),
        );

        settle(&root).await;
        settle(&child).await;
        settle(&static_child).await;

        cache.invalidate(&QueryKey::new([KeyAtom::new("m")]));

        assert!(root.is_stale());
        assert!(child.is_stale());
        assert!(!static_child.is_stale());
    }

    #[tokio::test]
    async fn has_reflects_gc_after_last_unsubscribe() {
        let options = query_cache_core::QueryOpts::new()
            .gc_time(Duration::from_millis(5))
            .build();
        let (cache, _driver) = test_cache();
        let q = cache.acquire(key("gc"), |_k| async { Ok::<_, String>(1u32) }, options);
        settle(&q).await;

        let disposer = q.subscribe(|_| {});
        assert!(cache.has(&key("gc")));
        disposer.dispose();

        for _ in 0..200 {
            if !cache.has(&key("gc")) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(!cache.has(&key("gc")));
    }

    #[tokio::test]
    async fn clear_empties_registry_and_notifies() {
        let (cache, _driver) = test_cache();
        let _q = cache.acquire(key("x"), |_k| async { Ok::<_, String>(1u32) }, QueryOptions::default());
        assert!(cache.has(&key("x")));

        let notified = Arc::new(AtomicBool::new(false));
        let flag = notified.clone();
        let _disposer = cache.on_change(move |_version| {
            flag.store(true, Ordering::SeqCst);
        });

        cache.clear();
        assert!(!cache.has(&key("x")));
        assert_eq!(cache.len(), 0);

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(notified.load(Ordering::SeqCst));
    }
}
