//! query-cache: an in-memory asynchronous query cache.
//!
//! Consumers declare queries by a structured key and a fetcher; the
//! cache deduplicates concurrent fetches, tracks per-query
//! subscribers, ages out unused entries, distinguishes "fresh" from
//! "stale" state, retries transient failures with configurable
//! backoff, and propagates prefix-based invalidation.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use query_cache::QueryCache;
//! use query_cache_core::{QueryKey, QueryOpts};
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = QueryCache::new();
//!     let query = cache.acquire(
//!         QueryKey::of("todos"),
//!         |_key| async { Ok::<_, String>(vec!["buy milk".to_string()]) },
//!         QueryOpts::new().stale_time(std::time::Duration::from_secs(30)).build(),
//!     );
//!
//!     let _disposer = query.subscribe(|snapshot| {
//!         println!("{:?}", snapshot.status);
//!     });
//! }
//! ```

mod cache;
mod disposer;
mod fetcher;
mod observer;
mod query;

pub use cache::QueryCache;
pub use disposer::Disposer;
pub use fetcher::Fetcher;
pub use observer::{ChangeObserver, RegistryVersion};
pub use query::{FetchStatus, Query, QuerySnapshot, QueryStatus};

// Re-export the shared vocabulary so a consumer only needs to depend
// on this crate for the common path.
pub use query_cache_core::{
    EvictionReason, GcTime, KeyAtom, LookupOutcome, NoopMetrics, QueryCacheError, QueryCacheMetrics,
    QueryKey, QueryOperation, QueryOpts, QueryOptions, RetryDelay, RetryPolicy, StaleTime,
};
pub use query_cache_timer::{TimerHandle, TimerWheel, TimerWheelConfig};
