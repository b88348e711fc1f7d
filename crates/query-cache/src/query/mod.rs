//! `Query<T>`: the per-key state machine, fetch orchestration,
//! subscriber fan-out, and GC scheduling.

mod state;

pub use state::{FetchStatus, QuerySnapshot, QueryStatus};

use crate::disposer::Disposer;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use query_cache_core::{EvictionReason, GcTime, QueryCacheError, QueryKey, QueryOptions, StaleTime};
use query_cache_retry::{RetryError, Retrier};
use query_cache_timer::{TimerHandle, TimerWheel};
use state::Internal;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::time::Instant;

pub(crate) type BoxFetchFn<T> =
    Arc<dyn Fn(QueryKey) -> BoxFuture<'static, Result<T, String>> + Send + Sync>;

type Listener<T> = Arc<dyn Fn(&QuerySnapshot<T>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SubscriberId(u64);

/// One cached logical value, keyed by a canonical [`QueryKey`].
///
/// Owns its [`Retrier`] and (while it has zero subscribers) a GC timer
/// handle on the shared [`TimerWheel`]. Callers never construct a
/// `Query` directly; it is returned by
/// [`crate::QueryCache::acquire`]/[`crate::QueryCache::get`].
pub struct Query<T: Clone + Send + Sync + 'static> {
    key: QueryKey,
    options: QueryOptions,
    fetch_fn: BoxFetchFn<T>,
    wheel: Arc<TimerWheel>,
    retrier: Retrier,
    state: Mutex<Internal<T>>,
    subscribers: Mutex<Vec<(SubscriberId, Listener<T>)>>,
    next_subscriber_id: AtomicU64,
    gc_timer: Mutex<Option<TimerHandle>>,
    stale_refetch_pending: AtomicBool,
    /// Invoked when this query destroys itself (GC or explicit
    /// `destroy()`), with the reason for metrics labeling; the cache
    /// uses it to drop its own registry entry and fire a deferred
    /// change notification. Held only by callback, never a
    /// back-reference to the cache.
    on_destroy: Arc<dyn Fn(&QueryKey, EvictionReason) + Send + Sync>,
    self_weak: Mutex<Weak<Query<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Query<T> {
    pub(crate) fn new(
        key: QueryKey,
        fetch_fn: BoxFetchFn<T>,
        options: QueryOptions,
        wheel: Arc<TimerWheel>,
        on_destroy: Arc<dyn Fn(&QueryKey, EvictionReason) + Send + Sync>,
    ) -> Arc<Self> {
        let query = Arc::new(Self {
            retrier: Retrier::new(wheel.clone()),
            key,
            fetch_fn,
            wheel,
            options,
            state: Mutex::new(Internal::default()),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(0),
            gc_timer: Mutex::new(None),
            stale_refetch_pending: AtomicBool::new(false),
            on_destroy,
            self_weak: Mutex::new(Weak::new()),
        });
        *query.self_weak.lock() = Arc::downgrade(&query);
        query
    }

    fn arc(&self) -> Arc<Self> {
        self.self_weak
            .lock()
            .upgrade()
            .expect("query outlives its own callbacks")
    }

    /// The canonical key this query was created with.
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// A point-in-time snapshot of this query's state.
    pub fn state(&self) -> QuerySnapshot<T> {
        self.state.lock().snapshot()
    }

    /// The current in-flight or most recently completed fetch, or
    /// `None` if no fetch has ever been started (never true in
    /// practice: `acquire` always kicks off an initial fetch).
    pub fn promise(&self) -> Option<Shared<BoxFuture<'static, Result<T, QueryCacheError>>>> {
        self.state.lock().current_promise.clone()
    }

    /// `true` if this query has never fetched successfully, or if its
    /// last success is older than `staleTime`. `staleTime = "static"`
    /// or infinite exempts the query permanently.
    pub fn is_stale(&self) -> bool {
        let state = self.state.lock();
        let Some(updated_at) = state.data_updated_at else {
            return true;
        };
        match self.options.stale_time {
            StaleTime::Static | StaleTime::Infinite => false,
            StaleTime::Finite(window) => {
                let window = window.max(std::time::Duration::from_millis(1));
                Instant::now() >= updated_at + window
            }
        }
    }

    /// Add a subscriber. The first subscriber cancels any pending GC
    /// and resumes the retrier; a subscriber that arrives while
    /// `status = pending` is notified synchronously with the current
    /// snapshot, and a stale `success` snapshot schedules a
    /// microtask-batched background refetch.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&QuerySnapshot<T>) + Send + Sync + 'static,
    ) -> Disposer {
        let id = SubscriberId(self.next_subscriber_id.fetch_add(1, Ordering::Relaxed));
        let listener: Listener<T> = Arc::new(listener);

        let was_first = {
            let mut subs = self.subscribers.lock();
            let was_first = subs.is_empty();
            subs.push((id, listener.clone()));
            was_first
        };
        if was_first {
            self.retrier.resume();
            self.cancel_gc();
        }

        let snapshot = self.state.lock().snapshot();
        if matches!(snapshot.status, QueryStatus::Pending) {
            listener(&snapshot);
        }

        let was_stale = self.is_stale();
        if was_stale && matches!(snapshot.status, QueryStatus::Success) {
            self.schedule_stale_refetch();
        }

        let this = self.clone();
        Disposer::new(move || this.unsubscribe(id))
    }

    fn unsubscribe(self: &Arc<Self>, id: SubscriberId) {
        let now_empty = {
            let mut subs = self.subscribers.lock();
            subs.retain(|(sid, _)| *sid != id);
            subs.is_empty()
        };
        if now_empty {
            self.retrier.pause();
            self.schedule_gc();
        }
    }

    /// Number of live subscribers. Exposed mainly for tests asserting
    /// that GC only fires once the last subscriber drops.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Batch the "subscribe while stale" refetch decision across a
    /// single task: many subscriptions mounting back-to-back share one
    /// refetch instead of each kicking off its own.
    fn schedule_stale_refetch(self: &Arc<Self>) {
        if self.stale_refetch_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            this.stale_refetch_pending.store(false, Ordering::Release);
            if this.subscribers.lock().is_empty() {
                return;
            }
            this.fetch(false);
        });
    }

    /// Force a refetch regardless of staleness.
    pub fn refetch(self: &Arc<Self>) -> Shared<BoxFuture<'static, Result<T, QueryCacheError>>> {
        self.fetch(false)
    }

    pub(crate) fn begin_initial_fetch(self: &Arc<Self>) {
        self.fetch(false);
    }

    /// Deduplicate concurrent fetches: if already fetching and
    /// `restart` is `false`, return the in-flight promise unchanged.
    /// Otherwise start a new one (bumping the epoch so a still-running
    /// superseded fetch can't clobber this one's result when it
    /// eventually resolves), driven eagerly by a background task so
    /// the caller needn't poll it for the fetch to make progress.
    /// `restart` is set by [`Query::invalidate`], which has already
    /// cancelled the retrier's in-flight execution and needs a fresh
    /// fetch to actually start rather than dedup onto the dying one.
    fn fetch(self: &Arc<Self>, restart: bool) -> Shared<BoxFuture<'static, Result<T, QueryCacheError>>> {
        let epoch = {
            let mut state = self.state.lock();
            if !restart && state.fetch_status == FetchStatus::Fetching {
                if let Some(existing) = state.current_promise.clone() {
                    return existing;
                }
            }
            state.fetch_status = FetchStatus::Fetching;
            state.fetch_epoch += 1;
            state.fetch_epoch
        };
        self.notify_subscribers();

        let this = self.clone();
        let fut: BoxFuture<'static, Result<T, QueryCacheError>> = Box::pin(async move {
            let fetch_fn = this.fetch_fn.clone();
            let key = this.key.clone();
            let outcome = this
                .retrier
                .execute(&this.options.retry, &this.options.retry_delay, move || {
                    let fetch_fn = fetch_fn.clone();
                    let key = key.clone();
                    async move { fetch_fn(key).await }
                })
                .await;

            let still_current = this.state.lock().fetch_epoch == epoch;

            match outcome {
                Ok(value) => {
                    if still_current {
                        let mut state = this.state.lock();
                        state.status = QueryStatus::Success;
                        state.data = Some(value.clone());
                        state.error = None;
                        state.data_updated_at = Some(Instant::now());
                        state.fetch_status = FetchStatus::Idle;
                        drop(state);
                        this.notify_subscribers();
                    }
                    Ok(value)
                }
                Err(RetryError::Cancelled) => Err(QueryCacheError::Cancelled),
                Err(RetryError::Failed(message)) => {
                    if still_current {
                        let mut state = this.state.lock();
                        state.status = QueryStatus::Error;
                        state.error = Some(QueryCacheError::Fetcher(message.clone()));
                        state.error_updated_at = Some(Instant::now());
                        state.fetch_status = FetchStatus::Idle;
                        drop(state);
                        this.notify_subscribers();
                    }
                    Err(QueryCacheError::Fetcher(message))
                }
            }
        });

        let shared = fut.shared();
        self.state.lock().current_promise = Some(shared.clone());
        let driver = shared.clone();
        tokio::spawn(async move {
            let _ = driver.await;
        });
        shared
    }

    /// Clear `dataUpdatedAt` (forcing [`Query::is_stale`] to return
    /// `true`) and, if subscribed, cancel the in-flight retrier
    /// execution and start a new fetch. A no-op for queries whose
    /// `staleTime` is `"static"`.
    pub fn invalidate(self: &Arc<Self>) {
        if matches!(self.options.stale_time, StaleTime::Static) {
            return;
        }
        self.state.lock().data_updated_at = None;
        if !self.subscribers.lock().is_empty() {
            self.retrier.cancel();
            self.fetch(true);
        }
    }

    /// Return to `pending/idle`, drop the current promise, and notify
    /// subscribers.
    pub fn reset(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            *state = Internal::default();
        }
        self.notify_subscribers();
    }

    /// Cancel any pending retry and GC timer, clear subscribers, drop
    /// the current promise, and report destruction upstream via the
    /// `on_destroy` callback so the owning cache can drop its registry
    /// entry.
    pub(crate) fn destroy(self: &Arc<Self>, reason: EvictionReason) {
        self.retrier.cancel();
        self.cancel_gc();
        self.subscribers.lock().clear();
        {
            let mut state = self.state.lock();
            *state = Internal::default();
            state.destroyed = true;
        }
        (self.on_destroy)(&self.key, reason);
    }

    fn cancel_gc(&self) {
        if let Some(handle) = self.gc_timer.lock().take() {
            self.wheel.cancel(handle);
        }
    }

    fn schedule_gc(self: &Arc<Self>) {
        let GcTime::Finite(duration) = self.options.gc_time else {
            return;
        };
        self.cancel_gc();
        let this = self.clone();
        let handle = self.wheel.schedule(duration, move || {
            this.on_gc_fire();
        });
        *self.gc_timer.lock() = Some(handle);
    }

    fn on_gc_fire(self: Arc<Self>) {
        *self.gc_timer.lock() = None;
        if !self.subscribers.lock().is_empty() {
            return;
        }
        self.destroy(EvictionReason::GarbageCollected);
    }

    fn notify_subscribers(&self) {
        let snapshot = self.state.lock().snapshot();
        let subscribers = self.subscribers.lock().clone();
        for (_, listener) in subscribers {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(&snapshot);
            }));
            if result.is_err() {
                tracing::error!(target: "query_cache", key = %key_debug(&self.key), "subscriber callback panicked");
            }
        }
    }
}

// QueryLifecycle is implemented for Query<T> itself so the cache's
// type-erased registry can invalidate/destroy entries without knowing
// T; see crate::cache.
impl<T: Clone + Send + Sync + 'static> crate::cache::QueryLifecycle for Query<T> {
    fn key(&self) -> &QueryKey {
        &self.key
    }

    fn invalidate_erased(&self) {
        self.arc().invalidate();
    }

    fn destroy_erased(&self, reason: EvictionReason) {
        self.arc().destroy(reason);
    }

    fn is_static_exempt(&self) -> bool {
        matches!(self.options.stale_time, StaleTime::Static)
    }
}

fn key_debug(key: &QueryKey) -> String {
    key.atoms()
        .iter()
        .map(|a| a.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use query_cache_core::{GcTime, KeyAtom, QueryOptions, RetryDelay, RetryPolicy, StaleTime};
    use query_cache_timer::TimerWheelConfig;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn wheel() -> Arc<TimerWheel> {
        TimerWheel::new(TimerWheelConfig {
            tick_duration: Duration::from_millis(1),
            ..TimerWheelConfig::default()
        })
    }

    fn spawn_driver(wheel: Arc<TimerWheel>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                wheel.advance();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    }

    fn key(s: &str) -> QueryKey {
        QueryKey::new([KeyAtom::new(s)])
    }

    fn ok_fetcher<T: Clone + Send + Sync + 'static>(value: T) -> BoxFetchFn<T> {
        Arc::new(move |_key| {
            let value = value.clone();
            Box::pin(async move { Ok(value) })
        })
    }

    #[tokio::test]
    async fn fresh_fetch_then_subscribe_sees_success() {
        let w = wheel();
        let _driver = spawn_driver(w.clone());
        let q = Query::new(
            key("a"),
            ok_fetcher("A".to_string()),
            QueryOptions::default(),
            w,
            Arc::new(|_, _| {}),
        );
        q.begin_initial_fetch();

        for _ in 0..50 {
            if matches!(q.state().status, QueryStatus::Success) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let snap = q.state();
        assert_eq!(snap.status, QueryStatus::Success);
        assert_eq!(snap.data.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe_schedules_gc() {
        let w = wheel();
        let _driver = spawn_driver(w.clone());
        let options = QueryOptions {
            gc_time: GcTime::Finite(Duration::from_millis(10)),
            ..QueryOptions::default()
        };
        let q = Query::new(
            key("b"),
            ok_fetcher(1u32),
            options,
            w,
            Arc::new(|_, _| {}),
        );
        q.begin_initial_fetch();

        let disposer = q.subscribe(|_| {});
        assert_eq!(q.subscriber_count(), 1);
        assert!(q.gc_timer.lock().is_none());

        disposer.dispose();
        assert_eq!(q.subscriber_count(), 0);
        assert!(q.gc_timer.lock().is_some());
    }

    #[tokio::test]
    async fn invalidate_marks_stale_and_refetches_when_subscribed() {
        let w = wheel();
        let _driver = spawn_driver(w.clone());
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let fetch_fn: BoxFetchFn<u32> = Arc::new(move |_key| {
            let calls = calls2.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok(n)
            })
        });
        let q = Query::new(key("c"), fetch_fn, QueryOptions::default(), w, Arc::new(|_, _| {}));
        q.begin_initial_fetch();
        let _disposer = q.subscribe(|_| {});

        for _ in 0..50 {
            if matches!(q.state().status, QueryStatus::Success) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(!q.is_stale());

        q.invalidate();
        assert!(q.is_stale());

        for _ in 0..50 {
            if calls.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn invalidate_while_fetching_restarts_the_fetch() {
        // Scenario 6: a fetch in flight is invalidated mid-flight.
        // The superseded fetch is allowed to run to completion, but a
        // new fetch must actually start and its result — not the
        // stale one's — must land in state.
        let w = wheel();
        let _driver = spawn_driver(w.clone());
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let fetch_fn: BoxFetchFn<u32> = Arc::new(move |_key| {
            let calls = calls2.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(n)
            })
        });
        let q = Query::new(key("f"), fetch_fn, QueryOptions::default(), w, Arc::new(|_, _| {}));
        q.begin_initial_fetch();
        let _disposer = q.subscribe(|_| {});

        // Invalidate while the first fetch (n=0) is still sleeping.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(q.state().fetch_status, FetchStatus::Fetching);
        q.invalidate();

        for _ in 0..200 {
            if calls.load(Ordering::SeqCst) >= 2 && matches!(q.state().status, QueryStatus::Success) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // Both the superseded and the restarted fetch ran...
        assert!(calls.load(Ordering::SeqCst) >= 2);
        // ...but the query settled on the newer fetch's result (n=1),
        // not the cancelled one's (n=0), and isn't stuck `Fetching`.
        let snap = q.state();
        assert_eq!(snap.status, QueryStatus::Success);
        assert_eq!(snap.data, Some(1));
        assert_eq!(snap.fetch_status, FetchStatus::Idle);
    }

    #[tokio::test]
    async fn static_stale_time_exempts_from_invalidate() {
        let w = wheel();
        let _driver = spawn_driver(w.clone());
        let options = QueryOptions {
            stale_time: StaleTime::Static,
            ..QueryOptions::default()
        };
        let q = Query::new(key("d"), ok_fetcher(1u32), options, w, Arc::new(|_, _| {}));
        q.begin_initial_fetch();
        for _ in 0..50 {
            if matches!(q.state().status, QueryStatus::Success) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let before = q.state().data_updated_at;
        q.invalidate();
        assert_eq!(q.state().data_updated_at, before);
        assert!(!q.is_stale());
    }

    #[tokio::test]
    async fn retry_then_success_updates_state() {
        let w = wheel();
        let _driver = spawn_driver(w.clone());
        let attempt = Arc::new(AtomicU32::new(0));
        let attempt2 = attempt.clone();
        let fetch_fn: BoxFetchFn<String> = Arc::new(move |_key| {
            let attempt = attempt2.clone();
            Box::pin(async move {
                let n = attempt.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(format!("E{n}"))
                } else {
                    Ok("V".to_string())
                }
            })
        });
        let options = QueryOptions {
            retry: RetryPolicy::count(2),
            retry_delay: RetryDelay::fixed(Duration::from_millis(2)),
            ..QueryOptions::default()
        };
        let q = Query::new(key("e"), fetch_fn, options, w, Arc::new(|_, _| {}));
        q.begin_initial_fetch();

        for _ in 0..200 {
            let status = q.state().status;
            if matches!(status, QueryStatus::Success) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let snap = q.state();
        assert_eq!(snap.status, QueryStatus::Success);
        assert_eq!(snap.data.as_deref(), Some("V"));
        assert_eq!(attempt.load(Ordering::SeqCst), 3);
    }
}
