//! Event encoding: the boundary between domain event types and the bytes a
//! [`crate::adapter::StoreAdapter`] actually stores.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::timeline::{EncodedEvent, TimelineEvent};

/// Gives a domain event type a stable name, used as the `event_type` tag
/// under which it is stored and by which a [`Codec`] recognizes it again on
/// decode.
pub trait Message {
    /// The stable name for this event variant, e.g. `"FavoriteAdded"`.
    fn name(&self) -> &'static str;
}

/// Converts between domain event values and the bytes a store adapter
/// persists.
///
/// `Context` carries whatever ambient information `encode` needs beyond the
/// event itself (correlation/causation ids, tracing context); it defaults to
/// `()` for codecs that need none.
pub trait Codec<Event, Context = ()>: Send + Sync {
    /// Serializes `event` into the wire representation, tagging it with
    /// identity and correlation metadata drawn from `context`.
    fn encode(&self, context: &Context, event: &Event) -> EncodedEvent;

    /// Attempts to deserialize `event` back into a domain value.
    ///
    /// Returns `None` when the event's `event_type` is not recognized, or
    /// when the payload fails to deserialize; per the propagation policy,
    /// both cases are treated as a skip rather than a hard error, so that a
    /// stream containing events from a newer or unrelated schema can still
    /// be folded.
    fn try_decode(&self, event: &TimelineEvent) -> Option<Event>;
}

/// Context available to a [`JsonCodec`] when encoding an event: identifies
/// the request/transaction that produced it, and optionally the event that
/// caused it.
#[derive(Debug, Clone, Default)]
pub struct EncodeContext {
    /// Identifies the request/command/transaction producing this event.
    pub correlation_id: Option<String>,
    /// Identifies the event that caused this one, for causal chains.
    pub causation_id: Option<String>,
}

/// The default [`Codec`]: JSON payload and metadata, event type taken from
/// [`Message::name`].
///
/// Matches the backend-agnostic wire format assumed throughout this crate's
/// reference adapters: event rows/fields carry a type tag plus two opaque
/// byte blobs, and never need to know the domain event's Rust type.
pub struct JsonCodec<Event> {
    _marker: PhantomData<fn() -> Event>,
}

impl<Event> Default for JsonCodec<Event> {
    fn default() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<Event> JsonCodec<Event> {
    /// Builds a new JSON codec for `Event`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<Event> Codec<Event, EncodeContext> for JsonCodec<Event>
where
    Event: Message + Serialize + DeserializeOwned,
{
    fn encode(&self, context: &EncodeContext, event: &Event) -> EncodedEvent {
        // An event that fails to serialize indicates a bug in the domain
        // type, not a recoverable runtime condition; `eventually`'s own
        // JsonSerde makes the same call.
        let data = serde_json::to_vec(event).expect("event payload must be JSON-serializable");

        let metadata = serde_json::to_vec(&serde_json::json!({
            "correlationId": context.correlation_id,
            "causationId": context.causation_id,
        }))
        .expect("metadata must be JSON-serializable");

        EncodedEvent {
            event_type: event.name().to_owned(),
            data,
            metadata,
            event_id: Uuid::new_v4(),
            correlation_id: context.correlation_id.clone(),
            causation_id: context.causation_id.clone(),
        }
    }

    fn try_decode(&self, event: &TimelineEvent) -> Option<Event> {
        serde_json::from_slice(&event.data).ok()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    enum TestEvent {
        Added { name: String },
    }

    impl Message for TestEvent {
        fn name(&self) -> &'static str {
            match self {
                TestEvent::Added { .. } => "Added",
            }
        }
    }

    #[test]
    fn round_trips_through_json() {
        let codec = JsonCodec::<TestEvent>::new();
        let event = TestEvent::Added { name: "bobby".into() };
        let context = EncodeContext {
            correlation_id: Some("req-1".into()),
            causation_id: None,
        };

        let encoded = codec.encode(&context, &event);
        assert_eq!(encoded.event_type, "Added");

        let timeline_event = TimelineEvent {
            index: 0,
            event_type: encoded.event_type.clone(),
            data: encoded.data.clone(),
            metadata: encoded.metadata.clone(),
            event_id: encoded.event_id,
            correlation_id: encoded.correlation_id.clone(),
            causation_id: encoded.causation_id.clone(),
            timestamp: Utc::now(),
            size: encoded.approx_size(),
        };

        assert_eq!(codec.try_decode(&timeline_event), Some(event));
    }

    #[test]
    fn unknown_payload_decodes_to_none() {
        let codec = JsonCodec::<TestEvent>::new();
        let timeline_event = TimelineEvent {
            index: 0,
            event_type: "SomethingElse".into(),
            data: b"not json".to_vec(),
            metadata: Vec::new(),
            event_id: Uuid::new_v4(),
            correlation_id: None,
            causation_id: None,
            timestamp: Utc::now(),
            size: 8,
        };

        assert_eq!(codec.try_decode(&timeline_event), None);
    }
}
