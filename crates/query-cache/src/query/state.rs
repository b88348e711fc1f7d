//! The state data a [`super::Query`] carries and hands out as
//! snapshots.

use futures::future::{BoxFuture, Shared};
use query_cache_core::QueryCacheError;
use tokio::time::Instant;

/// The query's lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// No successful fetch has landed yet (and none is in flight, or
    /// one is — see [`FetchStatus`] for that axis).
    Pending,
    /// The most recent fetch succeeded.
    Success,
    /// The most recent fetch failed after exhausting retries.
    Error,
}

/// Whether a fetch is currently in flight, orthogonal to
/// [`QueryStatus`] (a query can be `Success` while `Fetching` a
/// background refetch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Idle,
    Fetching,
}

/// A point-in-time, owned copy of a query's state, handed to
/// subscribers and returned by [`super::Query::state`].
#[derive(Debug, Clone)]
pub struct QuerySnapshot<T> {
    pub status: QueryStatus,
    pub data: Option<T>,
    pub error: Option<QueryCacheError>,
    pub data_updated_at: Option<Instant>,
    pub error_updated_at: Option<Instant>,
    pub fetch_status: FetchStatus,
}

/// Internal, mutex-guarded state; [`Internal::snapshot`] is the only
/// way code outside this module observes it.
pub(super) struct Internal<T: Clone + Send + Sync + 'static> {
    pub status: QueryStatus,
    pub data: Option<T>,
    pub error: Option<QueryCacheError>,
    pub data_updated_at: Option<Instant>,
    pub error_updated_at: Option<Instant>,
    pub fetch_status: FetchStatus,
    pub current_promise: Option<Shared<BoxFuture<'static, Result<T, QueryCacheError>>>>,
    /// Bumped every time a new fetch starts; a completing fetch only
    /// writes `status`/`data`/`error` if its epoch is still current,
    /// so a fetch superseded by `invalidate()` can finish harmlessly
    /// without clobbering newer results.
    pub fetch_epoch: u64,
    pub destroyed: bool,
}

impl<T: Clone + Send + Sync + 'static> Default for Internal<T> {
    fn default() -> Self {
        Self {
            status: QueryStatus::Pending,
            data: None,
            error: None,
            data_updated_at: None,
            error_updated_at: None,
            fetch_status: FetchStatus::Idle,
            current_promise: None,
            fetch_epoch: 0,
            destroyed: false,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Internal<T> {
    pub fn snapshot(&self) -> QuerySnapshot<T> {
        QuerySnapshot {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            data_updated_at: self.data_updated_at,
            error_updated_at: self.error_updated_at,
            fetch_status: self.fetch_status,
        }
    }
}
