//! The [`StoreAdapter`] trait: the one seam a concrete backend (in-memory,
//! relational, document-store) must implement. Everything above this trait —
//! access strategies, caching, the Decider facade — is backend-agnostic.

use async_trait::async_trait;

use crate::timeline::{EncodedEvent, TimelineEvent};
use crate::token::{StreamName, Token, Version};

/// What the writer expected the stream's version to be when appending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The stream must not exist yet.
    NoStream,
    /// The stream must be at exactly this version.
    Exact(Version),
    /// No expectation; always append regardless of current version.
    Any,
}

/// Successful outcome of [`StoreAdapter::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    /// The stream's version after the append landed.
    pub version: Version,
}

/// Failure modes of a read ([`StoreAdapter::load_forward`] /
/// [`StoreAdapter::load_backward_until`]).
#[derive(Debug, thiserror::Error)]
pub enum LoadFailure<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// A backward scan exceeded [`StoreAdapter::max_batch_reads`] without
    /// satisfying the origin predicate. This is fatal rather than silently
    /// truncated: a truncated fold would silently corrupt state.
    #[error("exceeded {max_batches} batch reads without finding an origin event")]
    BatchLimitExceeded {
        /// The configured maximum.
        max_batches: u32,
    },

    /// The backend could not be reached, or returned an error unrelated to
    /// read semantics.
    #[error(transparent)]
    Unavailable(#[from] E),
}

/// Failure modes of [`StoreAdapter::append`].
#[derive(Debug, thiserror::Error)]
pub enum AppendFailure<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The stream's actual version did not match `expected`.
    #[error("version conflict: expected {expected:?}, actual stream version {actual}")]
    Conflict {
        /// What the writer expected.
        expected: ExpectedVersion,
        /// What the stream's version actually was.
        actual: Version,
    },

    /// The backend could not be reached, or returned an error unrelated to
    /// append semantics.
    #[error(transparent)]
    Unavailable(#[from] E),
}

/// The contract a concrete event-store backend must satisfy.
///
/// Implementors own all batching and pagination: `load_forward` and
/// `load_backward_until` each return the full requested range, reading
/// as many pages from the backend as needed (up to `max_batch_reads`,
/// if configured) before returning to the caller. Nothing above this
/// trait ever issues a second read to continue a truncated one.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// The backend-specific error type, wrapped by [`LoadFailure`] and
    /// [`AppendFailure`] and ultimately by
    /// [`crate::error::EngineError::StoreUnavailable`].
    type Error: std::error::Error + Send + Sync + 'static;

    /// The batching granularity this adapter reads/writes in. Used to derive
    /// [`crate::token::Position::batch_capacity_limit`].
    fn batch_size(&self) -> usize;

    /// The maximum number of batches a backward scan may read before giving
    /// up with [`LoadFailure::BatchLimitExceeded`]. `None` means unbounded.
    fn max_batch_reads(&self) -> Option<u32> {
        None
    }

    /// The canonical empty-stream token for this adapter's configured
    /// `batch_size`: what [`crate::category::Category`] hands a stream that
    /// has never been written to, instead of synthesizing one ad hoc.
    fn token_empty(&self) -> Token {
        Token::empty(self.batch_size())
    }

    /// Reads every event in `stream` from `from_index` (inclusive) to the
    /// end, returning the stream's resulting version alongside the events.
    ///
    /// `require_leader` requests a read against the backend's primary/leader
    /// rather than a possibly-lagging replica, when the backend draws that
    /// distinction.
    async fn load_forward(
        &self,
        stream: &StreamName,
        from_index: i64,
        require_leader: bool,
    ) -> Result<(Version, Vec<TimelineEvent>), LoadFailure<Self::Error>>;

    /// Reads `stream` backward from its tip, stopping as soon as
    /// `is_origin` returns `true` for an event (that event is included), or
    /// once the start of the stream is reached. Returns events in ascending
    /// (forward) order alongside the stream's version.
    async fn load_backward_until(
        &self,
        stream: &StreamName,
        is_origin: &(dyn Fn(&TimelineEvent) -> bool + Send + Sync),
        require_leader: bool,
    ) -> Result<(Version, Vec<TimelineEvent>), LoadFailure<Self::Error>>;

    /// Appends `events` to `stream`, enforcing `expected_version`
    /// optimistically. Returns the stream's new version on success.
    async fn append(
        &self,
        stream: &StreamName,
        expected_version: ExpectedVersion,
        events: Vec<EncodedEvent>,
    ) -> Result<Appended, AppendFailure<Self::Error>>;
}
