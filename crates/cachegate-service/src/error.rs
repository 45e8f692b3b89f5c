use thiserror::Error;

/// An error surfaced by a cache operation.
///
/// The enum is `Clone` because a single failed fill is delivered to every caller that
/// awaited the shared in-flight computation, and each of them gets its own copy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Malformed input at the call that introduced it: a bad key, a non-positive
    /// expiration, a priority hint containing a newline, or an unparsable policy line.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A cached or freshly produced value could not be viewed as the caller's
    /// expected type.
    ///
    /// This is a caller contract violation and is never silently retried.
    #[error("cached value is not of type {expected}")]
    TypeMismatch {
        /// The type the caller asked for.
        expected: &'static str,
    },

    /// A fill operation was invoked without an explicit policy while the service has
    /// no default policy configured.
    #[error("no cache policy was supplied and no default policy is configured")]
    NoCachePolicy,

    /// A backend provider failed.
    ///
    /// Propagates to every current waiter of the associated in-flight fill; the
    /// failure is not cached and the next call starts a fresh attempt.
    #[error("cache provider failed: {0}")]
    Provider(String),

    /// The value factory failed (or its task panicked).
    ///
    /// Like provider errors, factory failures are never cached.
    #[error("value factory failed: {0}")]
    Factory(String),
}

impl From<std::io::Error> for CacheError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl CacheError {
    /// Folds an arbitrary error into a [`Provider`](Self::Provider) error, reporting it
    /// through `tracing` at the original call site.
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::Provider(e.to_string())
    }
}

/// The result of a cache operation.
pub type CacheResult<T> = Result<T, CacheError>;
