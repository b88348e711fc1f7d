//! Configuration vocabulary for the retrier: how many times to retry
//! and how long to wait between attempts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Whether a failed fetch should be retried.
///
/// Four shapes: a plain boolean (`true` capped at 3 retries, matching
/// the spec's boolean contract), a fixed attempt count, an explicitly
/// unlimited policy, or a predicate consulted with the running failure
/// count and the error that was thrown.
#[derive(Clone)]
pub enum RetryPolicy {
    /// `false` disables retrying; `true` retries at most 3 times.
    Bool(bool),
    /// Retry up to this many times before giving up.
    Count(u32),
    /// Retry indefinitely. Distinct from `Bool(true)`, which is capped
    /// at 3 — this is an explicit opt-in, not the boolean default.
    Infinite,
    /// Consulted with `(failure_count, error)`; `true` retries again.
    Predicate(Arc<dyn Fn(u32, &str) -> bool + Send + Sync>),
}

/// `true` retries default to: at most this many attempts.
const BOOL_TRUE_MAX_RETRIES: u32 = 3;

impl Default for RetryPolicy {
    fn default() -> Self {
        // `retry: true` by spec default, i.e. at most 3 retries.
        RetryPolicy::Bool(true)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryPolicy::Bool(b) => write!(f, "RetryPolicy::Bool({b})"),
            RetryPolicy::Count(n) => write!(f, "RetryPolicy::Count({n})"),
            RetryPolicy::Infinite => write!(f, "RetryPolicy::Infinite"),
            RetryPolicy::Predicate(_) => write!(f, "RetryPolicy::Predicate(..)"),
        }
    }
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        RetryPolicy::Bool(false)
    }

    /// Retry forever. Unlike `Bool(true)`, not capped at 3 attempts.
    pub fn infinite() -> Self {
        RetryPolicy::Infinite
    }

    /// Retry up to `count` times.
    pub fn count(count: u32) -> Self {
        RetryPolicy::Count(count)
    }

    /// Retry based on a predicate over the failure count and error.
    pub fn predicate(f: impl Fn(u32, &str) -> bool + Send + Sync + 'static) -> Self {
        RetryPolicy::Predicate(Arc::new(f))
    }

    /// Decide whether another attempt should be made after
    /// `failure_count` consecutive failures, the most recent with
    /// message `error`.
    pub fn should_retry(&self, failure_count: u32, error: &str) -> bool {
        match self {
            RetryPolicy::Bool(false) => false,
            RetryPolicy::Bool(true) => failure_count < BOOL_TRUE_MAX_RETRIES,
            RetryPolicy::Count(max) => failure_count < *max,
            RetryPolicy::Infinite => true,
            RetryPolicy::Predicate(f) => f(failure_count, error),
        }
    }
}

/// How long to wait before the next retry attempt.
#[derive(Clone)]
pub enum RetryDelay {
    /// Always wait this long.
    Fixed(Duration),
    /// Exponential backoff: `base * 2^attempt`, capped at `max`.
    Exponential { base: Duration, max: Duration },
    /// Computed from the attempt number (0-indexed) and error message.
    Fn(Arc<dyn Fn(u32, &str) -> Duration + Send + Sync>),
}

impl Default for RetryDelay {
    fn default() -> Self {
        // No delay between attempts, per spec default.
        RetryDelay::Fixed(Duration::ZERO)
    }
}

impl fmt::Debug for RetryDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryDelay::Fixed(d) => write!(f, "RetryDelay::Fixed({d:?})"),
            RetryDelay::Exponential { base, max } => {
                write!(f, "RetryDelay::Exponential {{ base: {base:?}, max: {max:?} }}")
            }
            RetryDelay::Fn(_) => write!(f, "RetryDelay::Fn(..)"),
        }
    }
}

impl RetryDelay {
    /// Fixed delay between every attempt.
    pub fn fixed(duration: Duration) -> Self {
        RetryDelay::Fixed(duration)
    }

    /// Custom delay function of `(attempt, error)`.
    pub fn from_fn(f: impl Fn(u32, &str) -> Duration + Send + Sync + 'static) -> Self {
        RetryDelay::Fn(Arc::new(f))
    }

    /// Compute the delay before attempt number `attempt` (0-indexed,
    /// i.e. the delay before the first retry is `attempt == 0`).
    pub fn delay_for(&self, attempt: u32, error: &str) -> Duration {
        match self {
            RetryDelay::Fixed(d) => *d,
            RetryDelay::Exponential { base, max } => {
                let shift = attempt.min(20);
                base.checked_mul(1u32 << shift).unwrap_or(*max).min(*max)
            }
            RetryDelay::Fn(f) => f(attempt, error),
        }
    }
}
