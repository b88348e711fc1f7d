//! Pooled timer entries.
//!
//! Scheduling a GC delay or a retry sleep happens on every fetch, so
//! the wheel avoids allocating a fresh heap node per call: entries are
//! drawn from a bounded free list and returned to it once fired or
//! cancelled, the way a busy allocator would pool short-lived nodes.

use tokio::time::Instant;

/// Opaque handle returned by [`crate::TimerWheel::schedule`], used to
/// cancel the timer before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub(crate) u64);

pub(crate) type Callback = Box<dyn FnOnce() + Send + 'static>;

/// A single scheduled callback, as tracked inside the wheel.
/// Cancellation is tracked separately, in the wheel's
/// `cancelled: DashMap<TimerHandle, ()>`, and checked at fire time.
pub(crate) struct TimerEntry {
    pub handle: TimerHandle,
    pub expires_at: Instant,
    pub callback: Option<Callback>,
}

impl TimerEntry {
    fn reset(&mut self, handle: TimerHandle, expires_at: Instant, callback: Callback) {
        self.handle = handle;
        self.expires_at = expires_at;
        self.callback = Some(callback);
    }
}

/// Bounded free list of [`TimerEntry`] shells. Capacity defaults to
/// 100, matching the pool size used elsewhere for short-lived
/// scheduling metadata; beyond that, entries are simply dropped and
/// freshly allocated next time.
pub(crate) struct EntryPool {
    free: Vec<TimerEntry>,
    capacity: usize,
}

impl EntryPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Vec::with_capacity(capacity.min(32)),
            capacity,
        }
    }

    pub fn acquire(&mut self, handle: TimerHandle, expires_at: Instant, callback: Callback) -> TimerEntry {
        if let Some(mut entry) = self.free.pop() {
            entry.reset(handle, expires_at, callback);
            entry
        } else {
            TimerEntry {
                handle,
                expires_at,
                callback: Some(callback),
            }
        }
    }

    pub fn release(&mut self, mut entry: TimerEntry) {
        if self.free.len() < self.capacity {
            entry.callback = None;
            self.free.push(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_reuses_released_entries() {
        let mut pool = EntryPool::new(2);
        let now = Instant::now();
        let e1 = pool.acquire(TimerHandle(1), now, Box::new(|| {}));
        pool.release(e1);
        assert_eq!(pool.free.len(), 1);

        let e2 = pool.acquire(TimerHandle(2), now, Box::new(|| {}));
        assert_eq!(pool.free.len(), 0);
        assert_eq!(e2.handle, TimerHandle(2));
    }

    #[test]
    fn pool_drops_beyond_capacity() {
        let mut pool = EntryPool::new(1);
        let now = Instant::now();
        let e1 = pool.acquire(TimerHandle(1), now, Box::new(|| {}));
        let e2 = pool.acquire(TimerHandle(2), now, Box::new(|| {}));
        pool.release(e1);
        pool.release(e2);
        assert_eq!(pool.free.len(), 1);
    }
}
