//! [`RedisStoreAdapter`]: the [`ledger_core::StoreAdapter`] implementation
//! backing this crate, grounded on the paginated `XRANGE`/`XREVRANGE`
//! scanning in [`crate::stream::into_xrange_stream`] and the Lua-scripted
//! conditional append in [`crate::store::EventStore::append`] — adapted so
//! the version check and the batch of `XADD`s commit as a single atomic
//! script invocation instead of a Rust-side check-then-write.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use ledger_core::adapter::{Appended, AppendFailure, ExpectedVersion, LoadFailure, StoreAdapter};
use ledger_core::timeline::{EncodedEvent, TimelineEvent};
use ledger_core::token::{StreamName, Version};

static APPEND_TO_STORE_SOURCE: &str = std::include_str!("append_to_store.lua");

lazy_static! {
    static ref APPEND_TO_STORE_SCRIPT: redis::Script = redis::Script::new(APPEND_TO_STORE_SOURCE);
}

/// Errors surfaced by [`RedisStoreAdapter`] that are not already captured by
/// [`AppendFailure::Conflict`] or [`LoadFailure::BatchLimitExceeded`].
#[derive(Debug, thiserror::Error)]
pub enum RedisError {
    /// The connection, a command, or the append script failed.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A stream entry was missing a field this adapter always writes;
    /// indicates the stream was written by something other than this
    /// adapter, or data was corrupted.
    #[error("stream entry missing field '{0}'")]
    MissingField(&'static str),
}

fn entry_field(entry: &HashMap<String, Vec<u8>>, name: &'static str) -> Result<Vec<u8>, RedisError> {
    entry.get(name).cloned().ok_or(RedisError::MissingField(name))
}

fn entry_to_timeline(id: &str, entry: &HashMap<String, Vec<u8>>) -> Result<TimelineEvent, RedisError> {
    let index: i64 = String::from_utf8_lossy(&entry_field(entry, "index")?)
        .parse()
        .map_err(|_| RedisError::MissingField("index"))?;

    let event_type = String::from_utf8_lossy(&entry_field(entry, "event_type")?).into_owned();
    let data = entry_field(entry, "data")?;
    let metadata = entry_field(entry, "metadata")?;

    let event_id_raw = String::from_utf8_lossy(&entry_field(entry, "event_id")?).into_owned();
    let event_id = Uuid::parse_str(&event_id_raw).unwrap_or_else(|_| Uuid::nil());

    let correlation_id = non_empty(String::from_utf8_lossy(&entry_field(entry, "correlation_id")?).into_owned());
    let causation_id = non_empty(String::from_utf8_lossy(&entry_field(entry, "causation_id")?).into_owned());

    let timestamp = redis_entry_timestamp(id);
    let size = data.len() + metadata.len() + event_type.len();

    Ok(TimelineEvent {
        index,
        event_type,
        data,
        metadata,
        event_id,
        correlation_id,
        causation_id,
        timestamp,
        size,
    })
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Redis Stream entry ids are `{millis}-{seq}`; use the millisecond
/// component as this event's recorded timestamp.
fn redis_entry_timestamp(id: &str) -> DateTime<Utc> {
    let millis: i64 = id.split('-').next().and_then(|s| s.parse().ok()).unwrap_or(0);
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
}

/// A [`StoreAdapter`] backed by a Redis Stream per event stream, with
/// optimistic concurrency enforced by an atomically-invoked Lua script.
pub struct RedisStoreAdapter {
    conn: ConnectionManager,
    batch_size: usize,
    max_batch_reads: Option<u32>,
}

impl RedisStoreAdapter {
    /// Builds an adapter over an existing connection manager, reading
    /// `batch_size` entries per `XRANGE`/`XREVRANGE` page.
    pub fn new(conn: ConnectionManager, batch_size: usize) -> Self {
        Self {
            conn,
            batch_size,
            max_batch_reads: None,
        }
    }

    /// Connects to `client` and builds an adapter reading `batch_size`
    /// entries per page.
    pub async fn connect(client: &redis::Client, batch_size: usize) -> Result<Self, RedisError> {
        let conn = client.get_connection_manager().await?;
        Ok(Self::new(conn, batch_size))
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
impl StoreAdapter for RedisStoreAdapter {
    type Error = RedisError;

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn max_batch_reads(&self) -> Option<u32> {
        self.max_batch_reads
    }

    #[tracing::instrument(skip(self), fields(stream = %stream), err)]
    async fn load_forward(
        &self,
        stream: &StreamName,
        from_index: i64,
        _require_leader: bool,
    ) -> Result<(Version, Vec<TimelineEvent>), LoadFailure<Self::Error>> {
        let key = stream.as_wire();
        let mut conn = self.conn.clone();

        let version: u64 = conn.xlen(&key).await.map_err(RedisError::from)?;

        let mut events = Vec::new();
        let mut cursor = "-".to_owned();
        let mut batches_read = 0u32;

        loop {
            batches_read += 1;
            if let Some(max_batches) = self.max_batch_reads {
                if batches_read > max_batches {
                    return Err(LoadFailure::BatchLimitExceeded { max_batches });
                }
            }

            let reply: redis::streams::StreamRangeReply = conn
                .xrange_count(&key, cursor.as_str(), "+", self.batch_size.max(1))
                .await
                .map_err(RedisError::from)?;

            let page_len = reply.ids.len();

            for id in &reply.ids {
                let fields = stream_id_fields(id);
                let event = entry_to_timeline(&id.id, &fields).map_err(LoadFailure::Unavailable)?;
                if event.index >= from_index {
                    events.push(event);
                }
            }

            match reply.ids.last() {
                Some(last) => cursor = format!("({}", last.id),
                None => break,
            }

            if page_len < self.batch_size.max(1) {
                break;
            }
        }

        Ok((version as Version, events))
    }

    #[tracing::instrument(skip(self, is_origin), fields(stream = %stream), err)]
    async fn load_backward_until(
        &self,
        stream: &StreamName,
        is_origin: &(dyn Fn(&TimelineEvent) -> bool + Send + Sync),
        _require_leader: bool,
    ) -> Result<(Version, Vec<TimelineEvent>), LoadFailure<Self::Error>> {
        let key = stream.as_wire();
        let mut conn = self.conn.clone();

        let version: u64 = conn.xlen(&key).await.map_err(RedisError::from)?;

        let mut cursor = "+".to_owned();
        let mut batches_read = 0u32;
        let mut collected: Vec<TimelineEvent> = Vec::new();

        loop {
            batches_read += 1;
            if let Some(max_batches) = self.max_batch_reads {
                if batches_read > max_batches {
                    return Err(LoadFailure::BatchLimitExceeded { max_batches });
                }
            }

            let reply: redis::streams::StreamRangeReply = conn
                .xrevrange_count(&key, cursor.as_str(), "-", self.batch_size.max(1))
                .await
                .map_err(RedisError::from)?;

            if reply.ids.is_empty() {
                collected.reverse();
                return Ok((version as Version, collected));
            }

            let page_len = reply.ids.len();
            let mut found = false;

            for id in &reply.ids {
                let fields = stream_id_fields(id);
                let event = entry_to_timeline(&id.id, &fields).map_err(LoadFailure::Unavailable)?;
                let hit = is_origin(&event);
                cursor = format!("({}", id.id);
                collected.push(event);
                if hit {
                    found = true;
                    break;
                }
            }

            if found || page_len < self.batch_size.max(1) {
                collected.reverse();
                return Ok((version as Version, collected));
            }
        }
    }

    #[tracing::instrument(skip(self, events), fields(stream = %stream, events = events.len()), err)]
    async fn append(
        &self,
        stream: &StreamName,
        expected_version: ExpectedVersion,
        events: Vec<EncodedEvent>,
    ) -> Result<Appended, AppendFailure<Self::Error>> {
        let key = stream.as_wire();
        let mut conn = self.conn.clone();

        let expected_arg: i64 = match expected_version {
            ExpectedVersion::Any => -1,
            ExpectedVersion::NoStream => 0,
            ExpectedVersion::Exact(v) => v,
        };

        let mut invocation = APPEND_TO_STORE_SCRIPT.key(&key).arg(expected_arg);

        for event in &events {
            invocation = invocation
                .arg(&event.event_type)
                .arg(event.data.as_slice())
                .arg(event.metadata.as_slice())
                .arg(event.event_id.to_string())
                .arg(event.correlation_id.as_deref().unwrap_or(""))
                .arg(event.causation_id.as_deref().unwrap_or(""));
        }

        let result: Result<u64, redis::RedisError> = invocation.invoke_async(&mut conn).await;

        match result {
            Ok(new_version) => Ok(Appended {
                version: new_version as Version,
            }),
            Err(err) => {
                if let Some(actual) = parse_conflict(&err) {
                    Err(AppendFailure::Conflict {
                        expected: expected_version,
                        actual,
                    })
                } else {
                    Err(AppendFailure::Unavailable(RedisError::from(err)))
                }
            },
        }
    }
}

fn stream_id_fields(id: &redis::streams::StreamId) -> HashMap<String, Vec<u8>> {
    let mut fields = HashMap::new();
    for (key, value) in &id.map {
        if let redis::Value::Data(bytes) = value {
            fields.insert(key.clone(), bytes.clone());
        }
    }
    fields
}

fn parse_conflict(err: &redis::RedisError) -> Option<Version> {
    let message = err.to_string();
    let rest = message.strip_prefix("CONFLICT ")?;
    rest.trim().parse().ok()
}
