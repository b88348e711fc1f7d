//! query-cache-retry: the cancellable, pausable retry loop that
//! drives every `Query`'s fetch.
//!
//! Sleeping between attempts goes through `query-cache-timer`'s
//! [`query_cache_timer::TimerWheel`] rather than a raw
//! `tokio::time::sleep`, so retry delays and GC expirations share one
//! scheduling facility process-wide.

mod retrier;

pub use retrier::{Retrier, RetryError};
