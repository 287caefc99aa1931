//! A [`StoreAdapter`] backed by an in-process `HashMap`, used for tests, the
//! bundled demos, and as the executable reference for how the contract in
//! [`crate::adapter`] is meant to behave.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::adapter::{Appended, AppendFailure, ExpectedVersion, LoadFailure, StoreAdapter};
use crate::timeline::{EncodedEvent, TimelineEvent};
use crate::token::{StreamName, Version};

#[derive(Debug, Clone)]
struct StoredEvent {
    index: i64,
    event_type: String,
    data: Vec<u8>,
    metadata: Vec<u8>,
    event_id: Uuid,
    correlation_id: Option<String>,
    causation_id: Option<String>,
    timestamp: chrono::DateTime<Utc>,
}

impl StoredEvent {
    fn to_timeline(&self) -> TimelineEvent {
        TimelineEvent {
            index: self.index,
            event_type: self.event_type.clone(),
            data: self.data.clone(),
            metadata: self.metadata.clone(),
            event_id: self.event_id,
            correlation_id: self.correlation_id.clone(),
            causation_id: self.causation_id.clone(),
            timestamp: self.timestamp,
            size: self.data.len() + self.metadata.len() + self.event_type.len(),
        }
    }
}

/// This adapter never fails on its own; it exists to exercise the engine's
/// control flow, not backend fault tolerance.
#[derive(Debug, thiserror::Error)]
pub enum InMemoryError {}

/// An in-process [`StoreAdapter`]. Streams live only as long as the process;
/// nothing is persisted.
pub struct InMemoryStoreAdapter {
    batch_size: usize,
    max_batch_reads: Option<u32>,
    streams: RwLock<HashMap<String, Vec<StoredEvent>>>,
}

impl InMemoryStoreAdapter {
    /// Builds a new, empty adapter. `batch_size` governs how many events a
    /// backward scan reads per page, and therefore how
    /// [`crate::token::Position::batch_capacity_limit`] is derived.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            max_batch_reads: None,
            streams: RwLock::new(HashMap::new()),
        }
    }

    /// Caps the number of pages a backward scan may read before giving up
    /// with [`LoadFailure::BatchLimitExceeded`].
    #[must_use]
    pub fn with_max_batch_reads(mut self, max_batch_reads: u32) -> Self {
        self.max_batch_reads = Some(max_batch_reads);
        self
    }
}

#[async_trait]
impl StoreAdapter for InMemoryStoreAdapter {
    type Error = InMemoryError;

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn max_batch_reads(&self) -> Option<u32> {
        self.max_batch_reads
    }

    async fn load_forward(
        &self,
        stream: &StreamName,
        from_index: i64,
        _require_leader: bool,
    ) -> Result<(Version, Vec<TimelineEvent>), LoadFailure<Self::Error>> {
        let streams = self.streams.read();
        let events = streams.get(&stream.as_wire()).map(Vec::as_slice).unwrap_or(&[]);
        let version = events.len() as Version;

        let start = from_index.max(0) as usize;
        let slice = events.get(start..).unwrap_or(&[]);

        let mut collected = Vec::with_capacity(slice.len());
        let mut batches_read = 0u32;

        for page in slice.chunks(self.batch_size.max(1)) {
            batches_read += 1;
            if let Some(max_batches) = self.max_batch_reads {
                if batches_read > max_batches {
                    return Err(LoadFailure::BatchLimitExceeded { max_batches });
                }
            }

            collected.extend(page.iter().map(StoredEvent::to_timeline));
        }

        Ok((version, collected))
    }

    async fn load_backward_until(
        &self,
        stream: &StreamName,
        is_origin: &(dyn Fn(&TimelineEvent) -> bool + Send + Sync),
        _require_leader: bool,
    ) -> Result<(Version, Vec<TimelineEvent>), LoadFailure<Self::Error>> {
        let streams = self.streams.read();
        let events = streams.get(&stream.as_wire()).map(Vec::as_slice).unwrap_or(&[]);
        let version = events.len() as Version;

        let mut end = events.len();
        let mut batches_read = 0u32;

        loop {
            if end == 0 {
                return Ok((version, events.iter().map(StoredEvent::to_timeline).collect()));
            }

            let start = end.saturating_sub(self.batch_size.max(1));

            batches_read += 1;
            if let Some(max_batches) = self.max_batch_reads {
                if batches_read > max_batches {
                    return Err(LoadFailure::BatchLimitExceeded { max_batches });
                }
            }

            let page = &events[start..end];
            if let Some(offset) = page.iter().position(|e| is_origin(&e.to_timeline())) {
                let origin_index = start + offset;
                return Ok((version, events[origin_index..].iter().map(StoredEvent::to_timeline).collect()));
            }

            end = start;
        }
    }

    async fn append(
        &self,
        stream: &StreamName,
        expected_version: ExpectedVersion,
        events: Vec<EncodedEvent>,
    ) -> Result<Appended, AppendFailure<Self::Error>> {
        let mut streams = self.streams.write();
        let entry = streams.entry(stream.as_wire()).or_default();
        let current_version = entry.len() as Version;

        let satisfied = match expected_version {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoStream => current_version == 0,
            ExpectedVersion::Exact(expected) => current_version == expected,
        };

        if !satisfied {
            return Err(AppendFailure::Conflict {
                expected: expected_version,
                actual: current_version,
            });
        }

        let now = Utc::now();
        for (offset, event) in events.into_iter().enumerate() {
            entry.push(StoredEvent {
                index: current_version + offset as i64,
                event_type: event.event_type,
                data: event.data,
                metadata: event.metadata,
                event_id: event.event_id,
                correlation_id: event.correlation_id,
                causation_id: event.causation_id,
                timestamp: now,
            });
        }

        Ok(Appended {
            version: entry.len() as Version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(event_type: &str) -> EncodedEvent {
        EncodedEvent {
            event_type: event_type.to_owned(),
            data: b"{}".to_vec(),
            metadata: Vec::new(),
            event_id: Uuid::new_v4(),
            correlation_id: None,
            causation_id: None,
        }
    }

    #[tokio::test]
    async fn append_then_forward_load_round_trips() {
        let adapter = InMemoryStoreAdapter::new(10);
        let stream = StreamName::new("Favorites", "ClientJ").unwrap();

        let appended = adapter
            .append(&stream, ExpectedVersion::NoStream, vec![encoded("Added"), encoded("Added")])
            .await
            .unwrap();
        assert_eq!(appended.version, 2);

        let (version, events) = adapter.load_forward(&stream, 0, false).await.unwrap();
        assert_eq!(version, 2);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].index, 0);
        assert_eq!(events[1].index, 1);
    }

    #[tokio::test]
    async fn append_rejects_wrong_expected_version() {
        let adapter = InMemoryStoreAdapter::new(10);
        let stream = StreamName::new("Favorites", "ClientJ").unwrap();

        adapter
            .append(&stream, ExpectedVersion::NoStream, vec![encoded("Added")])
            .await
            .unwrap();

        let result = adapter.append(&stream, ExpectedVersion::Exact(0), vec![encoded("Added")]).await;
        assert!(matches!(result, Err(AppendFailure::Conflict { actual: 1, .. })));
    }

    #[tokio::test]
    async fn backward_scan_stops_at_origin() {
        let adapter = InMemoryStoreAdapter::new(2);
        let stream = StreamName::new("Favorites", "ClientJ").unwrap();

        adapter
            .append(
                &stream,
                ExpectedVersion::NoStream,
                vec![encoded("Added"), encoded("Snapshot"), encoded("Added")],
            )
            .await
            .unwrap();

        let (version, events) = adapter
            .load_backward_until(&stream, &|e| e.event_type == "Snapshot", false)
            .await
            .unwrap();

        assert_eq!(version, 3);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "Snapshot");
    }

    #[tokio::test]
    async fn forward_load_respects_max_batch_reads() {
        let adapter = InMemoryStoreAdapter::new(1).with_max_batch_reads(1);
        let stream = StreamName::new("Favorites", "ClientJ").unwrap();

        adapter
            .append(&stream, ExpectedVersion::NoStream, vec![encoded("Added"), encoded("Added")])
            .await
            .unwrap();

        let result = adapter.load_forward(&stream, 0, false).await;
        assert!(matches!(result, Err(LoadFailure::BatchLimitExceeded { max_batches: 1 })));
    }

    #[tokio::test]
    async fn backward_scan_respects_max_batch_reads() {
        let adapter = InMemoryStoreAdapter::new(1).with_max_batch_reads(1);
        let stream = StreamName::new("Favorites", "ClientJ").unwrap();

        adapter
            .append(&stream, ExpectedVersion::NoStream, vec![encoded("Added"), encoded("Added")])
            .await
            .unwrap();

        let result = adapter.load_backward_until(&stream, &|e| e.event_type == "Snapshot", false).await;
        assert!(matches!(result, Err(LoadFailure::BatchLimitExceeded { max_batches: 1 })));
    }
}
