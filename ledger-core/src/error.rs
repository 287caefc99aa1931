//! The error hierarchy surfaced to callers of [`crate::category::Category`]
//! and [`crate::decider::Decider`].
//!
//! Only version conflicts are recovered internally, by retrying against a
//! freshly reloaded state; every other condition propagates here, carrying
//! the stream name and the operation ([`Operation::Load`] or
//! [`Operation::Append`]) that failed.

/// Which half of the `load -> decide -> append` cycle an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// The error occurred while loading a stream's events.
    Load,
    /// The error occurred while appending new events to a stream.
    Append,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Load => write!(f, "load"),
            Operation::Append => write!(f, "append"),
        }
    }
}

/// Error raised when an [`crate::access::AccessStrategy`] is combined with a
/// [`crate::cache::Cache`] it is incompatible with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `LatestKnownEvent` folds a single event per load and is never safe to
    /// cache: a cached state could silently pin a decider to a stale single
    /// event forever.
    #[error("the LatestKnownEvent access strategy cannot be combined with a cache")]
    LatestKnownEventWithCache,
}

/// Errors surfaced by [`crate::category::Category`] and
/// [`crate::decider::Decider`] operations.
///
/// The underlying [`crate::adapter::StoreAdapter::Error`] is carried as a
/// type-erased source rather than as a generic parameter: a cache miss can
/// coalesce several concurrent callers onto a single in-flight load (see
/// [`crate::cache::Cache::get_or_load`]), and a shared future's error must be
/// handed to every waiter without requiring the adapter's own error type to
/// be `Clone`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A backward scan for an origin/snapshot event exhausted the adapter's
    /// configured `max_batch_reads` without finding one.
    #[error("reading stream {stream} exceeded the adapter's batch-read limit ({max_batches} batches)")]
    BatchLimitExceeded {
        /// Wire name of the stream being read.
        stream: String,
        /// The adapter's configured maximum number of batches per read.
        max_batches: u32,
    },

    /// A `transact`/`transact_result` loop exhausted its configured retry
    /// budget without a conflict-free append.
    #[error("stream {stream} exhausted {attempts} decide/append attempts without converging")]
    MaxResyncsExhausted {
        /// Wire name of the stream being written to.
        stream: String,
        /// The number of attempts made before giving up.
        attempts: u32,
    },

    /// The underlying store was unreachable or returned an error unrelated
    /// to optimistic-concurrency conflicts.
    #[error("store unavailable during {operation} on stream {stream}: {source}")]
    StoreUnavailable {
        /// Wire name of the stream being operated on.
        stream: String,
        /// Which operation was in flight.
        operation: Operation,
        /// The underlying adapter error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// The category was misconfigured (access strategy / cache mismatch).
    #[error(transparent)]
    Misconfiguration(#[from] ConfigError),

    /// A caller-supplied `tokio_util::sync::CancellationToken` fired while a
    /// `query`/`transact` call was suspended on the store.
    #[error("operation on stream {stream} was cancelled")]
    Cancelled {
        /// Wire name of the stream being operated on.
        stream: String,
    },
}

/// Convenience alias for results returned by engine-level operations.
pub type EngineResult<T> = Result<T, EngineError>;
