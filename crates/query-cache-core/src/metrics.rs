//! Observability trait for the query cache.
//!
//! Non-goals exclude network-specific metrics (request counts, byte
//! totals over the wire), but the cache's own lifecycle events —
//! hits, misses, stale serves, evictions, retries — are ambient
//! observability every embedding application wants, so this trait and
//! its no-op default are always present.

use std::time::Duration;

/// Outcome of a cache lookup, for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupOutcome {
    /// Fresh data served without a fetch.
    Hit,
    /// Stale data served while a background refetch runs.
    StaleHit,
    /// No entry existed; a fetch was started.
    Miss,
}

/// A query lifecycle event, for latency tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryOperation {
    Fetch,
    Retry,
    Invalidate,
    Gc,
}

impl QueryOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryOperation::Fetch => "fetch",
            QueryOperation::Retry => "retry",
            QueryOperation::Invalidate => "invalidate",
            QueryOperation::Gc => "gc",
        }
    }
}

/// Reason a query was removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    /// Garbage collected after its GC delay elapsed with zero subscribers.
    GarbageCollected,
    /// Removed by an explicit `clear()`.
    Cleared,
}

/// Trait for query cache observability.
///
/// Implement this to bridge into your metrics system (Prometheus,
/// StatsD, etc.). A [`NoopMetrics`] default is used when no
/// implementation is supplied.
pub trait QueryCacheMetrics: Send + Sync + 'static {
    /// Record a cache lookup outcome.
    fn record_lookup(&self, key: &str, outcome: LookupOutcome);

    /// Record the latency of a query operation.
    fn record_latency(&self, operation: QueryOperation, duration: Duration);

    /// Record a retry attempt being scheduled.
    fn record_retry(&self, key: &str, attempt: u32);

    /// Record a query leaving the registry.
    fn record_eviction(&self, key: &str, reason: EvictionReason);

    /// Record the number of live (non-evicted) queries.
    fn record_registry_size(&self, size: usize);
}

/// Zero-overhead default implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl QueryCacheMetrics for NoopMetrics {
    #[inline]
    fn record_lookup(&self, _key: &str, _outcome: LookupOutcome) {}

    #[inline]
    fn record_latency(&self, _operation: QueryOperation, _duration: Duration) {}

    #[inline]
    fn record_retry(&self, _key: &str, _attempt: u32) {}

    #[inline]
    fn record_eviction(&self, _key: &str, _reason: EvictionReason) {}

    #[inline]
    fn record_registry_size(&self, _size: usize) {}
}

#[cfg(feature = "metrics")]
mod metrics_crate {
    use super::*;

    /// Adapter recording into the `metrics` crate's global recorder.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct MetricsCrateAdapter;

    impl QueryCacheMetrics for MetricsCrateAdapter {
        fn record_lookup(&self, _key: &str, outcome: LookupOutcome) {
            let label = match outcome {
                LookupOutcome::Hit => "hit",
                LookupOutcome::StaleHit => "stale_hit",
                LookupOutcome::Miss => "miss",
            };
            metrics::counter!("query_cache_lookups_total", "outcome" => label).increment(1);
        }

        fn record_latency(&self, operation: QueryOperation, duration: Duration) {
            metrics::histogram!("query_cache_operation_seconds", "operation" => operation.as_str())
                .record(duration.as_secs_f64());
        }

        fn record_retry(&self, _key: &str, attempt: u32) {
            metrics::counter!("query_cache_retries_total").increment(attempt as u64);
        }

        fn record_eviction(&self, _key: &str, reason: EvictionReason) {
            let label = match reason {
                EvictionReason::GarbageCollected => "gc",
                EvictionReason::Cleared => "cleared",
            };
            metrics::counter!("query_cache_evictions_total", "reason" => label).increment(1);
        }

        fn record_registry_size(&self, size: usize) {
            metrics::gauge!("query_cache_registry_size").set(size as f64);
        }
    }
}

#[cfg(feature = "metrics")]
pub use metrics_crate::MetricsCrateAdapter;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_as_str() {
        assert_eq!(QueryOperation::Fetch.as_str(), "fetch");
        assert_eq!(QueryOperation::Gc.as_str(), "gc");
    }

    #[test]
    fn noop_metrics_do_not_panic() {
        let m = NoopMetrics;
        m.record_lookup("k", LookupOutcome::Hit);
        m.record_latency(QueryOperation::Fetch, Duration::from_millis(1));
        m.record_retry("k", 1);
        m.record_eviction("k", EvictionReason::GarbageCollected);
        m.record_registry_size(0);
    }
}
