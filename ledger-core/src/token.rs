//! The stream token and version model.
//!
//! A [`Token`] is the opaque handle carried by a [`crate::category::Category`]
//! through `load -> decide -> append -> reload`. Two tokens for the same
//! stream are only ever compared through [`Token::is_stale`]: a token that
//! reports a lower [`Version`] than the one already cached must never replace
//! it.

use std::fmt;

/// Zero-based, strictly increasing index of an event within a stream.
pub type Index = i64;

/// `lastIndex + 1` of a stream; `0` for an empty stream.
pub type Version = i64;

/// The index value denoting "no event has ever been appended to this stream".
pub const EMPTY_STREAM_VERSION: Index = -1;

/// A stream name, rendered on the wire as `"{category}-{id}"`.
///
/// Both `category` and `id` must be non-empty, and `category` may not
/// contain a `-` (it is the separator between the two components).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamName {
    category: String,
    id: String,
}

/// Error returned by [`StreamName::new`] when either component is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidStreamName {
    /// The category component was empty.
    #[error("stream category must not be empty")]
    EmptyCategory,
    /// The stream id component was empty.
    #[error("stream id must not be empty")]
    EmptyId,
    /// The category component contained a `-`, which is reserved as the
    /// separator between category and id on the wire.
    #[error("stream category must not contain '-'")]
    CategoryContainsSeparator,
}

impl StreamName {
    /// Builds a new [`StreamName`], validating both components.
    pub fn new(category: impl Into<String>, id: impl Into<String>) -> Result<Self, InvalidStreamName> {
        let category = category.into();
        let id = id.into();

        if category.is_empty() {
            return Err(InvalidStreamName::EmptyCategory);
        }
        if id.is_empty() {
            return Err(InvalidStreamName::EmptyId);
        }
        if category.contains('-') {
            return Err(InvalidStreamName::CategoryContainsSeparator);
        }

        Ok(Self { category, id })
    }

    /// The category component.
    #[inline]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// The stream id component.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Renders this stream name the way it appears on the wire:
    /// `"{category}-{id}"`.
    pub fn as_wire(&self) -> String {
        format!("{}-{}", self.category, self.id)
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_wire())
    }
}

/// The backend-observable position of a stream: the last seen event, the
/// most recent compaction (origin/snapshot) event if any, and how much
/// capacity remains before another compaction is warranted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Index of the last event included in the paired state. `-1` for an
    /// empty stream.
    pub stream_version: Index,

    /// Index of the most recent origin/snapshot event observed, if any.
    pub compaction_event_index: Option<Index>,

    /// Number of additional events that may be appended before another
    /// snapshot is warranted, per the access strategy's batching policy.
    pub batch_capacity_limit: Option<i32>,
}

impl Position {
    /// A fresh position for a stream that has never been written to.
    pub fn empty() -> Self {
        Self {
            stream_version: EMPTY_STREAM_VERSION,
            compaction_event_index: None,
            batch_capacity_limit: None,
        }
    }

    /// Derives `batch_capacity_limit` from this position's `stream_version`
    /// and `compaction_event_index`, per the formula in the access-strategy
    /// specification: events land often enough for snapshots that a backward
    /// scan always terminates within one batch.
    ///
    /// `unstored_pending` is the number of events not yet durably appended
    /// that the caller is about to account for (normally `0` when called
    /// right after a load or append has settled).
    #[must_use]
    pub fn with_batch_capacity(mut self, batch_size: usize, unstored_pending: i64) -> Self {
        let batch_size = batch_size as i64;

        let limit = match self.compaction_event_index {
            Some(compaction_index) => {
                batch_size - unstored_pending - (self.stream_version - compaction_index + 1)
            }
            None => batch_size - unstored_pending - (self.stream_version + 1) - 1,
        };

        self.batch_capacity_limit = Some(limit.max(0) as i32);
        self
    }
}

/// Opaque handle to a stream's state as of a point in time. Carried through
/// `load -> decide -> append -> reload`; immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    position: Position,
    version: Version,
    stream_bytes: usize,
}

impl Token {
    /// Builds a new token from a [`Position`] and the approximate wire size
    /// of the stream data folded into the paired state.
    pub fn new(position: Position, stream_bytes: usize) -> Self {
        Self {
            version: position.stream_version + 1,
            position,
            stream_bytes,
        }
    }

    /// The canonical empty-stream token for a store adapter reading
    /// `batch_size` events per page. This is what
    /// [`crate::adapter::StoreAdapter::token_empty`] hands a stream that has
    /// never been written to.
    pub fn empty(batch_size: usize) -> Self {
        Self::new(Position::empty().with_batch_capacity(batch_size, 0), 0)
    }

    /// `lastIndex + 1`; `0` for an empty stream.
    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Index of the last event included in the paired state.
    #[inline]
    pub fn stream_version(&self) -> Index {
        self.position.stream_version
    }

    /// Index of the most recent compaction (origin/snapshot) event observed.
    #[inline]
    pub fn compaction_event_index(&self) -> Option<Index> {
        self.position.compaction_event_index
    }

    /// Number of additional events that may be appended before another
    /// snapshot is warranted.
    #[inline]
    pub fn batch_capacity_limit(&self) -> Option<i32> {
        self.position.batch_capacity_limit
    }

    /// Approximate wire size of the stream data folded into the paired
    /// state. Bookkeeping only: the engine never branches on this value.
    #[inline]
    pub fn stream_bytes(&self) -> usize {
        self.stream_bytes
    }

    pub(crate) fn position(&self) -> Position {
        self.position
    }

    /// The default staleness predicate: `candidate` is stale with respect to
    /// `current` when `current` carries a strictly higher version. A stale
    /// token never overwrites a fresher cached one.
    #[inline]
    #[must_use]
    pub fn is_stale(current: &Token, candidate: &Token) -> bool {
        current.version > candidate.version
    }
}

/// Error returned when an append is rejected because the stream's current
/// version did not match what the writer expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("version conflict: expected stream version {expected}, actual {actual}")]
pub struct ConflictError {
    /// The version the writer expected the stream to be at.
    pub expected: Version,
    /// The stream's actual version.
    pub actual: Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_name_renders_as_category_dash_id() {
        let name = StreamName::new("Favorites", "ClientJ").unwrap();
        assert_eq!(name.as_wire(), "Favorites-ClientJ");
    }

    #[test]
    fn stream_name_rejects_dash_in_category() {
        assert_eq!(
            StreamName::new("Fav-orites", "ClientJ"),
            Err(InvalidStreamName::CategoryContainsSeparator)
        );
    }

    #[test]
    fn stream_name_rejects_empty_components() {
        assert_eq!(StreamName::new("", "x"), Err(InvalidStreamName::EmptyCategory));
        assert_eq!(StreamName::new("x", ""), Err(InvalidStreamName::EmptyId));
    }

    #[test]
    fn empty_token_has_version_zero() {
        let token = Token::empty(500);
        assert_eq!(token.version(), 0);
        assert_eq!(token.stream_version(), EMPTY_STREAM_VERSION);
    }

    #[test]
    fn staleness_gate_rejects_lower_versions() {
        let older = Token::new(Position::empty().with_batch_capacity(500, 0), 0);
        let newer = Token::new(
            Position {
                stream_version: 4,
                ..Position::empty()
            }
            .with_batch_capacity(500, 0),
            0,
        );

        assert!(!Token::is_stale(&older, &newer));
        assert!(Token::is_stale(&newer, &older));
    }

    #[test]
    fn batch_capacity_limit_without_compaction_index() {
        let position = Position {
            stream_version: 9,
            compaction_event_index: None,
            batch_capacity_limit: None,
        }
        .with_batch_capacity(10, 0);

        // 10 - 0 - (9+1) - 1 = -1 -> clamped to 0
        assert_eq!(position.batch_capacity_limit, Some(0));
    }

    #[test]
    fn batch_capacity_limit_with_compaction_index() {
        let position = Position {
            stream_version: 11,
            compaction_event_index: Some(2),
            batch_capacity_limit: None,
        }
        .with_batch_capacity(10, 0);

        // 10 - 0 - (11-2+1) = 0
        assert_eq!(position.batch_capacity_limit, Some(0));
    }
}
