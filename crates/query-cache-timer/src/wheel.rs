//! Hierarchical timer wheel.
//!
//! Four levels by default, 256 slots per level. Level 0 holds entries
//! due within the next `slots_per_level` ticks; level 1 holds entries
//! due within the next `slots_per_level^2` ticks, and so on. An entry
//! scheduled further out than the coarsest level's span is clamped
//! into the last slot of the coarsest level and re-inserted into a
//! finer slot once that coarse slot is swept, rather than doing a
//! classical cascade-down of the whole slot's contents up front.

use crate::entry::{Callback, EntryPool, TimerEntry, TimerHandle};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

struct Level {
    slots: Vec<VecDeque<TimerEntry>>,
    current: usize,
}

impl Level {
    fn new(slots_per_level: usize) -> Self {
        Self {
            slots: (0..slots_per_level).map(|_| VecDeque::new()).collect(),
            current: 0,
        }
    }
}

struct Inner {
    levels: Vec<Level>,
    pool: EntryPool,
    /// Absolute tick count since the wheel started.
    tick: u64,
    started_at: Instant,
}

/// Configuration for a [`TimerWheel`].
#[derive(Debug, Clone, Copy)]
pub struct TimerWheelConfig {
    /// Duration of a single tick (the wheel's base resolution).
    pub tick_duration: Duration,
    /// Slots per level. Must be a power of two.
    pub slots_per_level: usize,
    /// Number of hierarchy levels.
    pub levels: usize,
    /// Capacity of the entry object pool.
    pub pool_capacity: usize,
}

impl Default for TimerWheelConfig {
    fn default() -> Self {
        Self {
            tick_duration: Duration::from_millis(10),
            slots_per_level: 256,
            levels: 4,
            pool_capacity: 100,
        }
    }
}

/// A hierarchical timer wheel driven by a single coalesced host
/// timer: `query-cache` uses one instance of this type process-wide
/// for both GC delays and retry sleeps.
pub struct TimerWheel {
    config: TimerWheelConfig,
    inner: Mutex<Inner>,
    /// Flags for handles that were cancelled; checked at fire time so
    /// cancellation is O(1) and doesn't have to walk the slot lists.
    cancelled: DashMap<TimerHandle, ()>,
    next_id: AtomicU64,
    /// Wakes the background driver so it can re-arm its single sleep
    /// around a newly-scheduled, possibly-earlier deadline.
    pub(crate) notify: tokio::sync::Notify,
}

impl TimerWheel {
    /// Build a wheel with the given configuration.
    ///
    /// # Panics
    /// Panics if `slots_per_level` is not a power of two or `levels`
    /// is zero — both are programmer errors, not runtime conditions.
    pub fn new(config: TimerWheelConfig) -> Arc<Self> {
        assert!(
            config.slots_per_level.is_power_of_two(),
            "slots_per_level must be a power of two, got {}",
            config.slots_per_level
        );
        assert!(config.levels > 0, "a timer wheel needs at least one level");

        let levels = (0..config.levels)
            .map(|_| Level::new(config.slots_per_level))
            .collect();

        Arc::new(Self {
            inner: Mutex::new(Inner {
                levels,
                pool: EntryPool::new(config.pool_capacity),
                tick: 0,
                started_at: Instant::now(),
            }),
            cancelled: DashMap::new(),
            next_id: AtomicU64::new(1),
            notify: tokio::sync::Notify::new(),
            config,
        })
    }

    /// A wheel with [`TimerWheelConfig::default`].
    pub fn with_defaults() -> Arc<Self> {
        Self::new(TimerWheelConfig::default())
    }

    /// Schedule `callback` to run after `delay`. Returns a handle that
    /// can be passed to [`TimerWheel::cancel`].
    pub fn schedule(&self, delay: Duration, callback: impl FnOnce() + Send + 'static) -> TimerHandle {
        self.schedule_boxed(delay, Box::new(callback))
    }

    fn schedule_boxed(&self, delay: Duration, callback: Callback) -> TimerHandle {
        let handle = TimerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut inner = self.inner.lock();

        let delta_ticks = ticks_for(delay, self.config.tick_duration);
        let expires_at = Instant::now() + delay;
        let entry = inner.pool.acquire(handle, expires_at, callback);

        self.insert(&mut inner, entry, delta_ticks);
        drop(inner);
        // Wake the driver so it can re-arm its single host timer
        // around a possibly-earlier deadline instead of waiting for
        // its periodic fallback wake.
        self.notify.notify_one();
        handle
    }

    /// Cancel a previously scheduled timer. A no-op if it already
    /// fired or was already cancelled.
    pub fn cancel(&self, handle: TimerHandle) {
        self.cancelled.insert(handle, ());
    }

    /// Number of live (not yet fired, not cancelled) entries.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .levels
            .iter()
            .flat_map(|l| l.slots.iter())
            .map(|s| s.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every scheduled entry without firing it.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        for level in &mut inner.levels {
            for slot in &mut level.slots {
                slot.clear();
            }
        }
        self.cancelled.clear();
    }

    fn insert(&self, inner: &mut Inner, mut entry: TimerEntry, delta_ticks: u64) {
        let spl = self.config.slots_per_level as u64;
        let mut span = 1u64;
        for (level_idx, level) in inner.levels.iter_mut().enumerate() {
            let level_span = span * spl;
            let is_last = level_idx + 1 == inner.levels.len();
            if delta_ticks < level_span || is_last {
                let target_tick = inner.tick + delta_ticks;
                let slot = ((target_tick / span) % spl) as usize;
                level.slots[slot].push_back(entry);
                return;
            }
            span = level_span;
        }
        // Unreachable: the last level always accepts via `is_last`.
        let last = inner.levels.last_mut().expect("at least one level");
        entry.expires_at = Instant::now();
        last.slots[last.current].push_back(entry);
    }

    /// Advance the wheel to the current wall-clock time, firing any
    /// due callbacks and cascading coarser levels down as they wrap.
    /// Returns the instant the wheel should next be woken at, or
    /// `None` if nothing is scheduled.
    pub fn advance(&self) -> Option<Instant> {
        let mut inner = self.inner.lock();
        let elapsed = inner.started_at.elapsed();
        let target_tick = elapsed.as_nanos() / self.config.tick_duration.as_nanos().max(1);
        let target_tick = target_tick as u64;

        while inner.tick < target_tick {
            inner.tick += 1;
            self.tick_once(&mut inner);
        }

        self.next_deadline(&inner)
    }

    /// Sweep one base tick's worth of slots. Level 0 is swept every
    /// call; level L is only swept once every `slots_per_level^L`
    /// ticks, and only when the level below it has just completed a
    /// full rotation — the cascade that lets coarse, far-future
    /// entries eventually reach a fine-grained slot near their real
    /// deadline.
    fn tick_once(&self, inner: &mut Inner) {
        let spl = self.config.slots_per_level as u64;
        let levels_count = inner.levels.len();
        let mut level_span = 1u64;

        for level_idx in 0..levels_count {
            if inner.tick % level_span != 0 {
                break;
            }
            let local_tick = inner.tick / level_span;
            let slot = (local_tick % spl) as usize;

            let level = &mut inner.levels[level_idx];
            level.current = slot;
            let due: Vec<TimerEntry> = level.slots[slot].drain(..).collect();
            for entry in due {
                self.fire_or_recascade(inner, entry);
            }

            if slot != 0 {
                break;
            }
            level_span *= spl;
        }
    }

    fn fire_or_recascade(&self, inner: &mut Inner, mut entry: TimerEntry) {
        let now = Instant::now();
        if self.cancelled.remove(&entry.handle).is_some() {
            inner.pool.release(entry);
            return;
        }

        if entry.expires_at <= now {
            if let Some(cb) = entry.callback.take() {
                cb();
            }
            inner.pool.release(entry);
        } else {
            // Drift sweep: this slot fired early relative to the
            // entry's real deadline (possible after cascading a
            // coarse slot down); reschedule it for the remaining delta.
            let remaining = entry.expires_at.saturating_duration_since(now);
            let delta_ticks = ticks_for(remaining, self.config.tick_duration);
            self.insert(inner, entry, delta_ticks);
        }
    }

    fn next_deadline(&self, inner: &Inner) -> Option<Instant> {
        let mut best: Option<Instant> = None;
        for level in &inner.levels {
            for slot in &level.slots {
                for entry in slot {
                    if best.is_none_or(|b| entry.expires_at < b) {
                        best = Some(entry.expires_at);
                    }
                }
            }
        }
        best
    }
}

fn ticks_for(duration: Duration, tick_duration: Duration) -> u64 {
    let tick_nanos = tick_duration.as_nanos().max(1);
    let ticks = duration.as_nanos().div_ceil(tick_nanos);
    ticks as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    #[test]
    fn power_of_two_enforced() {
        let result = std::panic::catch_unwind(|| {
            TimerWheel::new(TimerWheelConfig {
                slots_per_level: 200,
                ..TimerWheelConfig::default()
            })
        });
        assert!(result.is_err());
    }

    #[test]
    fn schedule_and_fire() {
        let wheel = TimerWheel::new(TimerWheelConfig {
            tick_duration: Duration::from_millis(1),
            ..TimerWheelConfig::default()
        });
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        wheel
            .schedule(Duration::from_millis(5), move || {
                fired2.store(true, Ordering::SeqCst);
            });

        for _ in 0..50 {
            wheel.advance();
            if fired.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn cancel_prevents_fire() {
        let wheel = TimerWheel::new(TimerWheelConfig {
            tick_duration: Duration::from_millis(1),
            ..TimerWheelConfig::default()
        });
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let handle = wheel
            .schedule(Duration::from_millis(5), move || {
                fired2.store(true, Ordering::SeqCst);
            });
        wheel.cancel(handle);

        for _ in 0..50 {
            wheel.advance();
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn far_future_entry_cascades_down_to_fire() {
        let wheel = TimerWheel::new(TimerWheelConfig {
            tick_duration: Duration::from_millis(1),
            slots_per_level: 4,
            levels: 3,
            pool_capacity: 10,
        });
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        // 4*4*4 = 64 ticks span at the coarsest level; schedule well
        // past level 0's 4-tick span so it starts in a higher level.
        wheel
            .schedule(Duration::from_millis(20), move || {
                fired2.store(true, Ordering::SeqCst);
            });

        for _ in 0..200 {
            wheel.advance();
            if fired.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn unused_wheel_reports_empty() {
        let wheel = TimerWheel::with_defaults();
        assert!(wheel.is_empty());
    }
}
