//! Cancellable, pausable retry loop.
//!
//! A [`Retrier`] drives a single user-supplied async function through
//! an optional series of retries, sleeping between attempts on the
//! shared [`TimerWheel`] rather than a raw `tokio::time::sleep`, so
//! that retry delays and query GC timers share one scheduling
//! facility. Each call to [`Retrier::execute`] records a generation
//! number; a later call, or an explicit [`Retrier::cancel`], bumps the
//! generation and causes the earlier execution's next observable step
//! to end in [`RetryError::Cancelled`] instead of returning to its
//! caller.

use query_cache_core::{RetryDelay, RetryPolicy};
use query_cache_timer::TimerWheel;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Outcome of a superseded or explicitly cancelled execution, or the
/// original error once retries are exhausted.
#[derive(Debug, Clone)]
#[allow(clippy::large_enum_variant)]
pub enum RetryError<E> {
    /// The execution was superseded by a later call to `execute`, or
    /// `cancel()` was invoked while it was in flight.
    Cancelled,
    /// The retry predicate declined to retry again; `error` is the
    /// original rejection, preserved verbatim.
    Failed(E),
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Cancelled => write!(f, "retry execution cancelled"),
            RetryError::Failed(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {}

struct Inner {
    generation: u64,
    paused: bool,
}

/// A cancellable, pausable retry loop owned by a single `Query`.
///
/// Not `Clone`: a `Retrier` belongs to exactly one query.
pub struct Retrier {
    wheel: Arc<TimerWheel>,
    inner: Mutex<Inner>,
    /// Edge-triggered wakeup for both pause/resume transitions and
    /// cancellation, so an in-flight sleep can be interrupted promptly
    /// instead of running to completion before observing either.
    wake: Notify,
}

enum SleepOutcome {
    Completed,
    Interrupted,
}

impl Retrier {
    /// Build a retrier that sleeps on the given shared timer wheel.
    pub fn new(wheel: Arc<TimerWheel>) -> Self {
        Self {
            wheel,
            inner: Mutex::new(Inner {
                generation: 0,
                paused: false,
            }),
            wake: Notify::new(),
        }
    }

    /// Supersede any in-flight execution: its next sleep completion or
    /// loop re-entry will reject with [`RetryError::Cancelled`]. Does
    /// not abort an in-flight call to the user function; its result,
    /// if it eventually resolves, is ignored by the caller.
    pub fn cancel(&self) {
        self.inner.lock().generation += 1;
        self.wake.notify_waiters();
    }

    /// Clear cancellation state, allowing a fresh `execute` to run
    /// without being immediately treated as a continuation of a
    /// cancelled predecessor. `execute` already starts its own
    /// generation on every call, so this only needs to leave pause
    /// state untouched; provided for callers that want to release a
    /// would-be-stale generation count explicitly after a terminal
    /// cancellation.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.paused = false;
    }

    /// Suspend the retry loop: the next sleep or loop re-entry blocks
    /// until [`Retrier::resume`] is called. A sleep already in
    /// progress is interrupted and restarts its full delay after
    /// resume rather than continuing from where it left off.
    pub fn pause(&self) {
        self.inner.lock().paused = true;
        self.wake.notify_waiters();
    }

    /// Release every blocked sleep and the blocked loop re-entry.
    pub fn resume(&self) {
        self.inner.lock().paused = false;
        self.wake.notify_waiters();
    }

    fn is_superseded(&self, generation: u64) -> bool {
        self.inner.lock().generation != generation
    }

    async fn wait_while_paused(&self, generation: u64) -> Result<(), ()> {
        loop {
            if self.is_superseded(generation) {
                return Err(());
            }
            let notified = self.wake.notified();
            if !self.inner.lock().paused {
                return Ok(());
            }
            notified.await;
        }
    }

    /// Sleep for `delay`, racing against pause/resume/cancel
    /// notifications. A zero delay still yields once, so a caller
    /// spinning with `retryDelay: 0` still gets a chance to observe
    /// cancellation between attempts.
    async fn sleep(&self, delay: Duration, generation: u64) -> SleepOutcome {
        if delay.is_zero() {
            tokio::task::yield_now().await;
            return SleepOutcome::Completed;
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = self.wheel.schedule(delay, move || {
            let _ = tx.send(());
        });

        let notified = self.wake.notified();
        tokio::select! {
            _ = rx => SleepOutcome::Completed,
            _ = notified => {
                self.wheel.cancel(handle);
                SleepOutcome::Interrupted
            }
        }
    }

    /// Execute `fetch`, retrying according to `retry`/`retry_delay` on
    /// rejection. Any execution already in flight on this retrier is
    /// superseded: its next step observes cancellation instead of
    /// completing normally.
    pub async fn execute<T, E, F, Fut>(
        &self,
        retry: &RetryPolicy,
        retry_delay: &RetryDelay,
        mut fetch: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let generation = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.generation
        };

        let mut failure_count: u32 = 0;
        loop {
            if self.wait_while_paused(generation).await.is_err() {
                return Err(RetryError::Cancelled);
            }

            match fetch().await {
                Ok(value) => {
                    if self.is_superseded(generation) {
                        return Err(RetryError::Cancelled);
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if self.is_superseded(generation) {
                        return Err(RetryError::Cancelled);
                    }
                    let message = error.to_string();
                    if !retry.should_retry(failure_count, &message) {
                        return Err(RetryError::Failed(error));
                    }
                    let delay = retry_delay.delay_for(failure_count, &message);
                    failure_count += 1;

                    loop {
                        if self.wait_while_paused(generation).await.is_err() {
                            return Err(RetryError::Cancelled);
                        }
                        match self.sleep(delay, generation).await {
                            SleepOutcome::Completed => break,
                            SleepOutcome::Interrupted => {
                                if self.is_superseded(generation) {
                                    return Err(RetryError::Cancelled);
                                }
                                // Woken by pause/resume mid-sleep: loop
                                // back to wait_while_paused, then retry
                                // this same delay in full.
                                continue;
                            }
                        }
                    }
                }
            }
        }
    }
}
