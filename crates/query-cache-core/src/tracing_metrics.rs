//! `tracing`-backed [`QueryCacheMetrics`] adapter.

use crate::{EvictionReason, LookupOutcome, QueryCacheMetrics, QueryOperation};
use std::time::Duration;
use tracing::{debug, trace};

/// Metrics adapter that emits `tracing` events instead of recording
/// into a metrics backend. Useful when the embedding application
/// already aggregates structured logs and has no separate metrics
/// pipeline.
#[derive(Debug, Clone, Default)]
pub struct TracingMetrics {
    /// Optional service name prefix included on every event.
    service_name: Option<String>,
}

impl TracingMetrics {
    /// Create a new adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a service name to every emitted event.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }
}

impl QueryCacheMetrics for TracingMetrics {
    fn record_lookup(&self, key: &str, outcome: LookupOutcome) {
        debug!(
            target: "query_cache",
            event = "lookup",
            key = %key,
            outcome = ?outcome,
            service = ?self.service_name,
            "Query Cache Lookup"
        );
    }

    fn record_latency(&self, operation: QueryOperation, duration: Duration) {
        trace!(
            target: "query_cache",
            event = "latency",
            operation = operation.as_str(),
            duration_ms = duration.as_millis(),
            service = ?self.service_name,
            "Query Cache Operation Latency"
        );
    }

    fn record_retry(&self, key: &str, attempt: u32) {
        debug!(
            target: "query_cache",
            event = "retry",
            key = %key,
            attempt = attempt,
            service = ?self.service_name,
            "Query Cache Retry"
        );
    }

    fn record_eviction(&self, key: &str, reason: EvictionReason) {
        debug!(
            target: "query_cache",
            event = "eviction",
            key = %key,
            reason = ?reason,
            service = ?self.service_name,
            "Query Cache Eviction"
        );
    }

    fn record_registry_size(&self, size: usize) {
        trace!(
            target: "query_cache",
            event = "registry_size",
            size = size,
            service = ?self.service_name,
            "Query Cache Registry Size"
        );
    }
}
