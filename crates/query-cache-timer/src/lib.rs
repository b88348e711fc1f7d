//! query-cache-timer: the hierarchical timer wheel used process-wide
//! by `query-cache` and `query-cache-retry` for every scheduled event
//! (GC expiry, retry delays).
//!
//! The wheel itself only tracks entries and can compute the next
//! deadline ([`TimerWheel::advance`]); something has to actually call
//! `advance` on a schedule. [`WheelDriver`] is that something: a
//! background task holding a single coalesced host timer instead of
//! one `tokio::time::sleep` per scheduled entry.

mod driver;
mod entry;
mod wheel;

pub use driver::WheelDriver;
pub use entry::TimerHandle;
pub use wheel::{TimerWheel, TimerWheelConfig};
