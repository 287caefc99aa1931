//! [`PostgresStoreAdapter`]: the [`ledger_core::StoreAdapter`] implementation
//! backing this crate, grounded on the `Store`/`Streamer`/`Appender` pattern
//! in [`crate::event`] — a `sqlx::PgPool`, a `SERIALIZABLE DEFERRABLE`
//! transaction per append, and stream-version bookkeeping delegated to a
//! stored procedure so the version check and the row insert commit
//! atomically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use ledger_core::adapter::{Appended, AppendFailure, ExpectedVersion, LoadFailure, StoreAdapter};
use ledger_core::timeline::{EncodedEvent, TimelineEvent};
use ledger_core::token::{StreamName, Version};

/// Errors surfaced by [`PostgresStoreAdapter`] that are not already captured
/// by [`AppendFailure::Conflict`] or [`LoadFailure::BatchLimitExceeded`].
#[derive(Debug, thiserror::Error)]
pub enum PgError {
    /// The connection pool, a query, or the transaction itself failed.
    #[error("postgres error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migrations failed to apply on [`PostgresStoreAdapter::connect`].
    #[error("failed to run migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

fn row_to_timeline(row: PgRow) -> Result<TimelineEvent, sqlx::Error> {
    let index: i64 = row.try_get("index")?;
    let event_type: String = row.try_get("event_type")?;
    let data: Vec<u8> = row.try_get("data")?;
    let metadata: Vec<u8> = row.try_get("metadata")?;
    let event_id: Uuid = row.try_get("event_id")?;
    let correlation_id: Option<String> = row.try_get("correlation_id")?;
    let causation_id: Option<String> = row.try_get("causation_id")?;
    let timestamp: DateTime<Utc> = row.try_get("recorded_at")?;

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

async fn stream_version(pool: &PgPool, stream: &str) -> Result<Version, sqlx::Error> {
    let version: Option<i64> = sqlx::query_scalar("SELECT version FROM stream_versions WHERE stream_name = $1")
        .bind(stream)
        .fetch_optional(pool)
        .await?;

    Ok(version.unwrap_or(0))
}

/// A [`StoreAdapter`] backed by a `PgPool`. Construct with
/// [`PostgresStoreAdapter::connect`], which also applies [`crate::MIGRATIONS`].
pub struct PostgresStoreAdapter {
    pool: PgPool,
    batch_size: usize,
    max_batch_reads: Option<u32>,
}

impl PostgresStoreAdapter {
    /// Connects to `pool` and applies pending migrations, building an adapter
    /// that reads `batch_size` events per backward-scan page.
    pub async fn connect(pool: PgPool, batch_size: usize) -> Result<Self, PgError> {
        crate::MIGRATIONS.run(&pool).await?;

        Ok(Self {
            pool,
            batch_size,
            max_batch_reads: None,
        })
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
impl StoreAdapter for PostgresStoreAdapter {
    type Error = PgError;

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
        let wire = stream.as_wire();

        let version = stream_version(&self.pool, &wire).await.map_err(PgError::from)?;

        let mut cursor = from_index;
        let mut batches_read = 0u32;
        let mut collected: Vec<TimelineEvent> = Vec::new();

        loop {
            batches_read += 1;
            if let Some(max_batches) = self.max_batch_reads {
                if batches_read > max_batches {
                    return Err(LoadFailure::BatchLimitExceeded { max_batches });
                }
            }

            let rows = sqlx::query(
                r#"SELECT index, event_type, data, metadata, event_id, correlation_id, causation_id, recorded_at
                   FROM events
                   WHERE stream_name = $1 AND index >= $2
                   ORDER BY index ASC
                   LIMIT $3"#,
            )
            .bind(&wire)
            .bind(cursor)
            .bind(self.batch_size.max(1) as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(PgError::from)?;

            let page_len = rows.len();

            let page = rows
                .into_iter()
                .map(row_to_timeline)
                .collect::<Result<Vec<_>, _>>()
                .map_err(PgError::from)?;

            let highest_index = page.last().map(|e| e.index);
            collected.extend(page);

            if (page_len as i64) < self.batch_size.max(1) as i64 {
                return Ok((version, collected));
            }

            cursor = highest_index.map(|i| i + 1).unwrap_or(cursor);
        }
    }

    #[tracing::instrument(skip(self, is_origin), fields(stream = %stream), err)]
    async fn load_backward_until(
        &self,
        stream: &StreamName,
        is_origin: &(dyn Fn(&TimelineEvent) -> bool + Send + Sync),
        _require_leader: bool,
    ) -> Result<(Version, Vec<TimelineEvent>), LoadFailure<Self::Error>> {
        let wire = stream.as_wire();

        let version = stream_version(&self.pool, &wire).await.map_err(PgError::from)?;

        let mut upper_bound = version;
        let mut batches_read = 0u32;
        let mut collected: Vec<TimelineEvent> = Vec::new();

        loop {
            if upper_bound <= 0 {
                collected.reverse();
                return Ok((version, collected));
            }

            batches_read += 1;
            if let Some(max_batches) = self.max_batch_reads {
                if batches_read > max_batches {
                    return Err(LoadFailure::BatchLimitExceeded { max_batches });
                }
            }

            let rows = sqlx::query(
                r#"SELECT index, event_type, data, metadata, event_id, correlation_id, causation_id, recorded_at
                   FROM events
                   WHERE stream_name = $1 AND index < $2
                   ORDER BY index DESC
                   LIMIT $3"#,
            )
            .bind(&wire)
            .bind(upper_bound)
            .bind(self.batch_size.max(1) as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(PgError::from)?;

            if rows.is_empty() {
                collected.reverse();
                return Ok((version, collected));
            }

            let page = rows
                .into_iter()
                .map(row_to_timeline)
                .collect::<Result<Vec<_>, _>>()
                .map_err(PgError::from)?;

            let page_len = page.len();
            let lowest_index = page.last().map(|e| e.index).unwrap_or(upper_bound - 1);

            let mut found = None;
            for event in page {
                let hit = is_origin(&event);
                collected.push(event);
                if hit {
                    found = Some(());
                    break;
                }
            }

            if found.is_some() {
                collected.reverse();
                return Ok((version, collected));
            }

            if (page_len as i64) < self.batch_size.max(1) as i64 {
                collected.reverse();
                return Ok((version, collected));
            }

            upper_bound = lowest_index;
        }
    }

    #[tracing::instrument(skip(self, events), fields(stream = %stream, events = events.len()), err)]
    async fn append(
        &self,
        stream: &StreamName,
        expected_version: ExpectedVersion,
        events: Vec<EncodedEvent>,
    ) -> Result<Appended, AppendFailure<Self::Error>> {
        let wire = stream.as_wire();
        let events_len = events.len() as i64;

        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await.map_err(PgError::from)?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE DEFERRABLE")
            .execute(&mut *tx)
            .await
            .map_err(PgError::from)?;

        let (first_index, new_version): (i64, i64) = match expected_version {
            ExpectedVersion::Any => {
                let new_version: i32 = sqlx::query_scalar("SELECT upsert_stream_with_no_version_check($1, $2)")
                    .bind(&wire)
                    .bind(events_len as i32)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(PgError::from)?;

                (i64::from(new_version) - events_len, i64::from(new_version))
            },
            ExpectedVersion::NoStream | ExpectedVersion::Exact(_) => {
                let expected = match expected_version {
                    ExpectedVersion::NoStream => 0,
                    ExpectedVersion::Exact(v) => v,
                    ExpectedVersion::Any => unreachable!(),
                };
                let new_version = expected + events_len;

                let outcome = sqlx::query("CALL upsert_stream($1, $2, $3)")
                    .bind(&wire)
                    .bind(expected as i32)
                    .bind(new_version as i32)
                    .execute(&mut *tx)
                    .await;

                match outcome {
                    Ok(_) => (expected, new_version),
                    Err(err) => {
                        if crate::is_conflict_error(&err) {
                            let actual = stream_version(&self.pool, &wire).await.unwrap_or(expected);
                            return Err(AppendFailure::Conflict {
                                expected: expected_version,
                                actual,
                            });
                        }
                        return Err(AppendFailure::Unavailable(PgError::from(err)));
                    },
                }
            },
        };

        let now = Utc::now();
        for (offset, event) in events.into_iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO events (stream_name, index, event_type, data, metadata, event_id, correlation_id, causation_id, recorded_at)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
            )
            .bind(&wire)
            .bind(first_index + offset as i64)
            .bind(&event.event_type)
            .bind(&event.data)
            .bind(&event.metadata)
            .bind(event.event_id)
            .bind(&event.correlation_id)
            .bind(&event.causation_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(PgError::from)?;
        }

        tx.commit().await.map_err(PgError::from)?;

        Ok(Appended { version: new_version })
    }
}
