//! Error type shared across the query cache crates.

use thiserror::Error;

/// Error surfaced by query cache operations.
///
/// The fetcher's own error type is generic at the API boundary
/// (`Fetcher::Error`); once a query gives up retrying, the error is
/// rendered to a string and stored here so that every subscriber can
/// be handed an identical, `Clone`-able error value.
#[derive(Error, Debug, Clone)]
pub enum QueryCacheError {
    /// The fetcher returned an error and the retry policy gave up.
    #[error("fetch failed: {0}")]
    Fetcher(String),

    /// The in-flight fetch was superseded or the query was destroyed
    /// before it could complete.
    #[error("query execution cancelled")]
    Cancelled,

    /// A configuration value violates an invariant (e.g. a timer
    /// wheel level count of zero, a non-power-of-two slot count).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An internal invariant was violated. Reaching this is a bug.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for query cache operations.
pub type Result<T> = std::result::Result<T, QueryCacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QueryCacheError::Fetcher("boom".to_string());
        assert_eq!(err.to_string(), "fetch failed: boom");

        let err = QueryCacheError::Cancelled;
        assert_eq!(err.to_string(), "query execution cancelled");
    }

    #[test]
    fn test_error_clone() {
        let err = QueryCacheError::InvalidConfig("slots must be a power of two".into());
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }
}
