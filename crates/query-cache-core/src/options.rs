//! Per-query configuration: garbage-collection delay, staleness
//! window, and retry behavior.

use crate::retry_policy::{RetryDelay, RetryPolicy};
use std::time::Duration;

/// How long an unsubscribed query is kept before it is garbage
/// collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcTime {
    /// Collect after this much idle time with zero subscribers.
    Finite(Duration),
    /// Never collect; the entry lives until `clear()`/`destroy()`.
    Infinite,
}

impl Default for GcTime {
    fn default() -> Self {
        // Never collect unless the caller opts into a finite gc_time.
        GcTime::Infinite
    }
}

/// How long fetched data remains fresh before it is considered stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleTime {
    /// Stale once `now >= dataUpdatedAt + max(duration, 1ms)`.
    Finite(Duration),
    /// Never becomes stale once fetched.
    Infinite,
    /// Same as `Infinite`, and additionally exempted from prefix
    /// invalidation (the cache's `"static"` marker).
    Static,
}

impl Default for StaleTime {
    fn default() -> Self {
        StaleTime::Finite(Duration::ZERO)
    }
}

/// Per-query configuration.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Garbage-collection delay after the last subscriber leaves.
    pub gc_time: GcTime,
    /// Freshness window for fetched data.
    pub stale_time: StaleTime,
    /// Whether/how many times to retry a failed fetch.
    pub retry: RetryPolicy,
    /// Delay between retry attempts.
    pub retry_delay: RetryDelay,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            gc_time: GcTime::default(),
            stale_time: StaleTime::default(),
            retry: RetryPolicy::default(),
            retry_delay: RetryDelay::default(),
        }
    }
}

/// Fluent builder for [`QueryOptions`].
#[derive(Debug, Clone, Default)]
pub struct QueryOpts(QueryOptions);

impl QueryOpts {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a finite GC delay.
    pub fn gc_time(mut self, duration: Duration) -> Self {
        self.0.gc_time = GcTime::Finite(duration);
        self
    }

    /// Never garbage collect this query.
    pub fn gc_never(mut self) -> Self {
        self.0.gc_time = GcTime::Infinite;
        self
    }

    /// Set a finite staleness window.
    pub fn stale_time(mut self, duration: Duration) -> Self {
        self.0.stale_time = StaleTime::Finite(duration);
        self
    }

    /// Data is never stale once fetched.
    pub fn stale_never(mut self) -> Self {
        self.0.stale_time = StaleTime::Infinite;
        self
    }

    /// Data is never stale and exempt from prefix invalidation.
    pub fn stale_static(mut self) -> Self {
        self.0.stale_time = StaleTime::Static;
        self
    }

    /// Set the retry policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.0.retry = policy;
        self
    }

    /// Disable retries entirely.
    pub fn no_retry(mut self) -> Self {
        self.0.retry = RetryPolicy::none();
        self
    }

    /// Set the retry delay.
    pub fn retry_delay(mut self, delay: RetryDelay) -> Self {
        self.0.retry_delay = delay;
        self
    }

    /// Finish building.
    pub fn build(self) -> QueryOptions {
        self.0
    }
}

impl From<QueryOpts> for QueryOptions {
    fn from(opts: QueryOpts) -> Self {
        opts.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_never_gc_and_immediately_stale() {
        let opts = QueryOptions::default();
        assert_eq!(opts.gc_time, GcTime::Infinite);
        assert_eq!(opts.stale_time, StaleTime::Finite(Duration::ZERO));
    }

    #[test]
    fn builder_fluent() {
        let opts: QueryOptions = QueryOpts::new()
            .gc_time(Duration::from_secs(60))
            .stale_time(Duration::from_secs(30))
            .no_retry()
            .build();

        assert_eq!(opts.gc_time, GcTime::Finite(Duration::from_secs(60)));
        assert_eq!(opts.stale_time, StaleTime::Finite(Duration::from_secs(30)));
        assert!(!opts.retry.should_retry(0, "e"));
    }

    #[test]
    fn static_stale_time_is_distinct_from_infinite() {
        let opts = QueryOpts::new().stale_static().build();
        assert_eq!(opts.stale_time, StaleTime::Static);
        assert_ne!(StaleTime::Static, StaleTime::Infinite);
    }
}
