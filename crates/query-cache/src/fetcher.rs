//! The fetcher contract: a restartable, side-effect-free function that
//! produces the value a [`crate::Query`] caches.

use futures::future::BoxFuture;
use query_cache_core::QueryKey;
use std::future::Future;

/// A fetcher the cache may call more than once for the same key
/// (retries, refetches) and whose result it may discard (a superseded
/// fetch). Implemented for any `Fn(QueryKey) -> Future` closure via
/// the blanket impl below, so both a hand-written struct and a plain
/// closure work as a fetcher.
pub trait Fetcher<T>: Send + Sync + 'static {
    /// The fetcher's own error type. Stringified once retries are
    /// exhausted so every subscriber can be handed an identical,
    /// `Clone`-able [`query_cache_core::QueryCacheError::Fetcher`].
    type Error: std::fmt::Display + Send + Sync + 'static;

    /// Fetch the value for `key`. Must not assume the caller still
    /// cares about the result by the time the future resolves.
    fn fetch(&self, key: QueryKey) -> BoxFuture<'static, Result<T, Self::Error>>;
}

impl<T, E, F, Fut> Fetcher<T> for F
where
    F: Fn(QueryKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: std::fmt::Display + Send + Sync + 'static,
{
    type Error = E;

    fn fetch(&self, key: QueryKey) -> BoxFuture<'static, Result<T, E>> {
        Box::pin(self(key))
    }
}
