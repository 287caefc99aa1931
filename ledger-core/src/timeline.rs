//! Wire-level event representation: what an adapter reads from and writes to
//! a backend, before a [`crate::codec::Codec`] turns it into a domain event.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::token::Index;

/// An event as produced by a [`crate::codec::Codec`], ready to be handed to a
/// [`crate::adapter::StoreAdapter`] for appending.
#[derive(Debug, Clone)]
pub struct EncodedEvent {
    /// Identifies this event's payload shape, e.g. `"FavoriteAdded"`.
    pub event_type: String,
    /// The serialized event payload.
    pub data: Vec<u8>,
    /// The serialized event metadata (correlation/causation ids, timestamps,
    /// anything the codec chooses to carry alongside the payload).
    pub metadata: Vec<u8>,
    /// Unique id for this occurrence of the event.
    pub event_id: Uuid,
    /// Identifies the request/command/transaction that produced this event.
    pub correlation_id: Option<String>,
    /// Identifies the event that caused this one to be produced, for causal
    /// chains across streams.
    pub causation_id: Option<String>,
}

impl EncodedEvent {
    /// Approximate wire size of this event: payload plus metadata plus the
    /// type tag, used to populate [`TimelineEvent::size`].
    pub fn approx_size(&self) -> usize {
        self.data.len() + self.metadata.len() + self.event_type.len()
    }
}

/// An event as read back from a [`crate::adapter::StoreAdapter`]: the
/// durable record at a given index in a stream's timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    /// Position of this event within its stream.
    pub index: Index,
    /// Identifies this event's payload shape.
    pub event_type: String,
    /// The serialized event payload.
    pub data: Vec<u8>,
    /// The serialized event metadata.
    pub metadata: Vec<u8>,
    /// Unique id for this occurrence of the event.
    pub event_id: Uuid,
    /// Identifies the request/command/transaction that produced this event.
    pub correlation_id: Option<String>,
    /// Identifies the event that caused this one to be produced.
    pub causation_id: Option<String>,
    /// When the backend recorded this event.
    pub timestamp: DateTime<Utc>,
    /// Approximate wire size of this event, folded into a stream's
    /// `Token::stream_bytes` bookkeeping.
    pub size: usize,
}
