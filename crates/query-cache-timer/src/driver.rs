//! Background task that drives a [`TimerWheel`] with a single
//! coalesced host timer instead of one `tokio::time::sleep` per
//! scheduled entry.

use crate::wheel::TimerWheel;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Handle to the background driver task. Dropping this stops the
/// driver; the wheel itself keeps whatever entries were already
/// scheduled, they simply stop being swept.
pub struct WheelDriver {
    task: tokio::task::JoinHandle<()>,
}

impl WheelDriver {
    /// Spawn the driver loop on the current Tokio runtime.
    pub fn spawn(wheel: Arc<TimerWheel>) -> Self {
        let task = tokio::spawn(async move {
            loop {
                let deadline = wheel.advance();
                let sleep = match deadline {
                    Some(at) => at.saturating_duration_since(Instant::now()),
                    // Nothing scheduled: wake periodically rather than
                    // sleeping forever, so a schedule() that lands
                    // between the notify check and sleep isn't missed.
                    None => Duration::from_millis(50),
                };

                tokio::select! {
                    _ = tokio::time::sleep(sleep) => {}
                    _ = wheel.notify.notified() => {}
                }
            }
        });

        Self { task }
    }
}

impl Drop for WheelDriver {
    fn drop(&mut self) {
        self.task.abort();
    }
}
