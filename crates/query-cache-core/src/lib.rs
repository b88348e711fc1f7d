//! query-cache-core: shared types for the query-cache crates.
//!
//! Canonical query keys, per-query configuration, the error type, and
//! the observability trait all live here so that `query-cache-timer`
//! and `query-cache-retry` can depend on them without pulling in the
//! full query/cache machinery.

mod error;
mod key;
mod metrics;
mod options;
mod retry_policy;

#[cfg(feature = "tracing")]
mod tracing_metrics;

pub use error::{QueryCacheError, Result};
pub use key::{KeyAtom, QueryKey};
pub use metrics::{EvictionReason, LookupOutcome, NoopMetrics, QueryCacheMetrics, QueryOperation};
pub use options::{GcTime, QueryOpts, QueryOptions, StaleTime};
pub use retry_policy::{RetryDelay, RetryPolicy};

#[cfg(feature = "metrics")]
pub use metrics::MetricsCrateAdapter;

#[cfg(feature = "tracing")]
pub use tracing_metrics::TracingMetrics;
