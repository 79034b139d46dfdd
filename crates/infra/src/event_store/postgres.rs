//! Postgres-backed event entry store.
//!
//! Events and snapshots live in two tables. Uniqueness of stream positions
//! and event identifiers is enforced by the database, so concurrent writers in
//! different processes are detected the same way as writers in one process.
//!
//! ## Schema
//!
//! [`PostgresEventEntryStore::create_schema`] creates:
//!
//! - `domain_event_entry`: `global_index BIGSERIAL` primary key, unique
//!   `event_identifier`, unique `(aggregate_type, aggregate_identifier,
//!   sequence_number)`
//! - `snapshot_event_entry`: primary key `(aggregate_type,
//!   aggregate_identifier, sequence_number)`
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StorageError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | StorageError | Scenario |
//! |------------|----------------------|--------------|----------|
//! | Database (unique violation) | `23505` | `DuplicateKey` | Event identifier or stream position already taken |
//! | Database (other) | Any other | `Backend` | Constraint or syntax errors |
//! | PoolClosed | N/A | `Backend` | Connection pool was closed |
//! | Other | N/A | `Backend` | Network errors, connection failures, etc. |
//!
//! ## Runtime
//!
//! The store traits are synchronous. The store owns a tokio runtime and blocks
//! on it for every operation, so it must not be called from inside another
//! tokio runtime's worker threads.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use keel_core::{AggregateId, EventId, GlobalIndexToken};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Row};
use tracing::{Span, info, instrument};
use uuid::Uuid;

use super::backend::{EntryPosition, EventEntry, EventEntryStore, StorageError, TrackedEntry};
use super::query::EventCriteria;
use crate::serialization::{SerializedObject, SerializedType};

const ENTRY_COLUMNS: &str = "event_identifier, aggregate_type, aggregate_identifier, \
     sequence_number, time_stamp, payload_type, payload_revision, payload, meta_data";

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS domain_event_entry (
        global_index BIGSERIAL PRIMARY KEY,
        event_identifier UUID NOT NULL UNIQUE,
        aggregate_type TEXT NOT NULL,
        aggregate_identifier TEXT NOT NULL,
        sequence_number BIGINT NOT NULL CHECK (sequence_number >= 0),
        time_stamp TIMESTAMPTZ NOT NULL,
        payload_type TEXT NOT NULL,
        payload_revision TEXT,
        payload JSONB NOT NULL,
        meta_data JSONB NOT NULL,
        UNIQUE (aggregate_type, aggregate_identifier, sequence_number)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS domain_event_entry_time_stamp
        ON domain_event_entry (time_stamp, sequence_number, event_identifier)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS snapshot_event_entry (
        event_identifier UUID NOT NULL,
        aggregate_type TEXT NOT NULL,
        aggregate_identifier TEXT NOT NULL,
        sequence_number BIGINT NOT NULL CHECK (sequence_number >= 0),
        time_stamp TIMESTAMPTZ NOT NULL,
        payload_type TEXT NOT NULL,
        payload_revision TEXT,
        payload JSONB NOT NULL,
        meta_data JSONB NOT NULL,
        PRIMARY KEY (aggregate_type, aggregate_identifier, sequence_number)
    )
    "#,
];

/// Postgres-backed event entry store.
///
/// ## Thread Safety
///
/// Uses SQLx connection pool which is thread-safe (Arc + Send + Sync).
/// Batches of events are inserted in one transaction.
#[derive(Debug, Clone)]
pub struct PostgresEventEntryStore {
    pool: PgPool,
    runtime: Arc<tokio::runtime::Runtime>,
}

impl PostgresEventEntryStore {
    /// Connect to `database_url` on a dedicated runtime.
    pub fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("keel-postgres")
            .enable_all()
            .build()
            .map_err(|e| StorageError::Backend(format!("cannot start runtime: {e}")))?;

        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .connect(database_url),
            )
            .map_err(|e| map_sqlx_error("connect", e))?;

        Ok(Self::with_runtime(pool, Arc::new(runtime)))
    }

    /// Use an existing pool. The pool must have been created on `runtime`.
    pub fn with_runtime(pool: PgPool, runtime: Arc<tokio::runtime::Runtime>) -> Self {
        Self { pool, runtime }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the event and snapshot tables if they do not exist.
    pub fn create_schema(&self) -> Result<(), StorageError> {
        self.runtime.block_on(async {
            for statement in SCHEMA {
                sqlx::query(statement)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("create_schema", e))?;
            }
            info!("event store schema ready");
            Ok::<(), StorageError>(())
        })
    }

    #[instrument(skip(self, entries), fields(event_count = entries.len()), err)]
    async fn insert_events(&self, entries: Vec<EventEntry>) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for entry in &entries {
            bind_entry(sqlx::query(
                r#"
                INSERT INTO domain_event_entry (
                    event_identifier, aggregate_type, aggregate_identifier, sequence_number,
                    time_stamp, payload_type, payload_revision, payload, meta_data
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            ), entry)?
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("persist_events", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(aggregate_id = %aggregate_identifier, row_count), err)]
    async fn select_stream_batch(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
        first_sequence: u64,
        batch_size: usize,
    ) -> Result<Vec<EventEntry>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM domain_event_entry \
             WHERE aggregate_type = $1 AND aggregate_identifier = $2 AND sequence_number >= $3 \
             ORDER BY sequence_number ASC LIMIT $4"
        ))
        .bind(aggregate_type)
        .bind(aggregate_identifier.as_str())
        .bind(to_i64(first_sequence)?)
        .bind(to_i64(batch_size as u64)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_stream_batch", e))?;

        Span::current().record("row_count", rows.len());
        rows.iter().map(decode_entry).collect()
    }

    #[instrument(skip(self), fields(aggregate_id = %aggregate_identifier), err)]
    async fn select_last_snapshot(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
    ) -> Result<Option<EventEntry>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM snapshot_event_entry \
             WHERE aggregate_type = $1 AND aggregate_identifier = $2 \
             ORDER BY sequence_number DESC LIMIT 1"
        ))
        .bind(aggregate_type)
        .bind(aggregate_identifier.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_last_snapshot", e))?;

        row.as_ref().map(decode_entry).transpose()
    }

    #[instrument(
        skip(self, entry),
        fields(aggregate_type = %entry.aggregate_type, sequence_number = entry.sequence_number),
        err
    )]
    async fn upsert_snapshot(&self, entry: EventEntry) -> Result<(), StorageError> {
        bind_entry(sqlx::query(
            r#"
            INSERT INTO snapshot_event_entry (
                event_identifier, aggregate_type, aggregate_identifier, sequence_number,
                time_stamp, payload_type, payload_revision, payload, meta_data
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (aggregate_type, aggregate_identifier, sequence_number)
            DO UPDATE SET
                event_identifier = EXCLUDED.event_identifier,
                time_stamp = EXCLUDED.time_stamp,
                payload_type = EXCLUDED.payload_type,
                payload_revision = EXCLUDED.payload_revision,
                payload = EXCLUDED.payload,
                meta_data = EXCLUDED.meta_data
            "#,
        ), &entry)?
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("persist_snapshot", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(aggregate_id = %aggregate_identifier), err)]
    async fn delete_old_snapshots(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
        keep: usize,
    ) -> Result<usize, StorageError> {
        let result = sqlx::query(
            r#"
            DELETE FROM snapshot_event_entry
            WHERE aggregate_type = $1 AND aggregate_identifier = $2
              AND sequence_number NOT IN (
                SELECT sequence_number FROM snapshot_event_entry
                WHERE aggregate_type = $1 AND aggregate_identifier = $2
                ORDER BY sequence_number DESC
                LIMIT $3
              )
            "#,
        )
        .bind(aggregate_type)
        .bind(aggregate_identifier.as_str())
        .bind(to_i64(keep as u64)?)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("prune_snapshots", e))?;

        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip(self, criteria, after), fields(row_count), err)]
    async fn select_filtered_batch(
        &self,
        criteria: &EventCriteria,
        after: Option<&EntryPosition>,
        batch_size: usize,
    ) -> Result<Vec<EventEntry>, StorageError> {
        let mut query: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
            "SELECT {ENTRY_COLUMNS} FROM domain_event_entry WHERE TRUE"
        ));
        if let Some(bound) = criteria.from {
            query.push(if bound.is_inclusive() { " AND time_stamp >= " } else { " AND time_stamp > " });
            query.push_bind(bound.instant());
        }
        if let Some(bound) = criteria.to {
            query.push(if bound.is_inclusive() { " AND time_stamp <= " } else { " AND time_stamp < " });
            query.push_bind(bound.instant());
        }
        if let Some(aggregate_type) = &criteria.aggregate_type {
            query.push(" AND aggregate_type = ");
            query.push_bind(aggregate_type.clone());
        }
        if let Some(position) = after {
            query.push(" AND (time_stamp, sequence_number, event_identifier) > (");
            query.push_bind(position.timestamp);
            query.push(", ");
            query.push_bind(to_i64(position.sequence_number)?);
            query.push(", ");
            query.push_bind(*position.event_identifier.as_uuid());
            query.push(")");
        }
        query.push(" ORDER BY time_stamp, sequence_number, event_identifier LIMIT ");
        query.push_bind(to_i64(batch_size as u64)?);

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_filtered_batch", e))?;

        Span::current().record("row_count", rows.len());
        rows.iter().map(decode_entry).collect()
    }

    #[instrument(skip(self), fields(row_count), err)]
    async fn select_tracked(
        &self,
        after: Option<GlobalIndexToken>,
        limit: usize,
    ) -> Result<Vec<TrackedEntry>, StorageError> {
        let after = after.map_or(Ok(0), |t| to_i64(t.global_index()))?;
        let rows = sqlx::query(&format!(
            "SELECT global_index, {ENTRY_COLUMNS} FROM domain_event_entry \
             WHERE global_index > $1 ORDER BY global_index ASC LIMIT $2"
        ))
        .bind(after)
        .bind(to_i64(limit as u64)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_tracked", e))?;

        Span::current().record("row_count", rows.len());
        rows.iter()
            .map(|row| {
                let global_index: i64 = row
                    .try_get("global_index")
                    .map_err(|e| map_sqlx_error("fetch_tracked", e))?;
                Ok(TrackedEntry {
                    token: GlobalIndexToken::new(to_u64(global_index)?),
                    entry: decode_entry(row)?,
                })
            })
            .collect()
    }
}

impl EventEntryStore for PostgresEventEntryStore {
    fn persist_events(&self, entries: Vec<EventEntry>) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.runtime.block_on(self.insert_events(entries))
    }

    fn fetch_stream_batch(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
        first_sequence: u64,
        batch_size: usize,
    ) -> Result<Vec<EventEntry>, StorageError> {
        self.runtime.block_on(self.select_stream_batch(
            aggregate_type,
            aggregate_identifier,
            first_sequence,
            batch_size,
        ))
    }

    fn load_last_snapshot(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
    ) -> Result<Option<EventEntry>, StorageError> {
        self.runtime
            .block_on(self.select_last_snapshot(aggregate_type, aggregate_identifier))
    }

    fn persist_snapshot(&self, entry: EventEntry) -> Result<(), StorageError> {
        self.runtime.block_on(self.upsert_snapshot(entry))
    }

    fn prune_snapshots(
        &self,
        aggregate_type: &str,
        aggregate_identifier: &AggregateId,
        keep: usize,
    ) -> Result<usize, StorageError> {
        self.runtime
            .block_on(self.delete_old_snapshots(aggregate_type, aggregate_identifier, keep))
    }

    fn fetch_filtered_batch(
        &self,
        criteria: &EventCriteria,
        after: Option<&EntryPosition>,
        batch_size: usize,
    ) -> Result<Vec<EventEntry>, StorageError> {
        self.runtime
            .block_on(self.select_filtered_batch(criteria, after, batch_size))
    }

    fn fetch_tracked(
        &self,
        after: Option<GlobalIndexToken>,
        limit: usize,
    ) -> Result<Vec<TrackedEntry>, StorageError> {
        self.runtime.block_on(self.select_tracked(after, limit))
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>;

fn bind_entry<'q>(query: PgQuery<'q>, entry: &EventEntry) -> Result<PgQuery<'q>, StorageError> {
    Ok(query
        .bind(*entry.event_identifier.as_uuid())
        .bind(entry.aggregate_type.clone())
        .bind(entry.aggregate_identifier.as_str().to_string())
        .bind(to_i64(entry.sequence_number)?)
        .bind(entry.timestamp)
        .bind(entry.payload.serialized_type.name.clone())
        .bind(entry.payload.serialized_type.revision.clone())
        .bind(entry.payload.data.clone())
        .bind(entry.meta_data.clone()))
}

fn to_i64(value: u64) -> Result<i64, StorageError> {
    i64::try_from(value).map_err(|_| StorageError::Backend(format!("{value} exceeds BIGINT range")))
}

fn to_u64(value: i64) -> Result<u64, StorageError> {
    u64::try_from(value).map_err(|_| StorageError::Backend(format!("negative stored position {value}")))
}

/// Map SQLx errors to `StorageError`.
///
/// Unique violations (`23505`) mean another writer already stored the same
/// event identifier or stream position.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            if db_err.code().as_deref() == Some("23505") {
                StorageError::DuplicateKey(msg)
            } else {
                StorageError::Backend(msg)
            }
        }
        sqlx::Error::PoolClosed => {
            StorageError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StorageError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn decode_entry(row: &PgRow) -> Result<EventEntry, StorageError> {
    EventEntryRow::from_row(row)
        .map_err(|e| StorageError::Backend(format!("failed to decode event row: {e}")))?
        .try_into()
}

/// Internal row representation for event and snapshot entries.
#[derive(Debug)]
struct EventEntryRow {
    event_identifier: Uuid,
    aggregate_type: String,
    aggregate_identifier: String,
    sequence_number: i64,
    time_stamp: DateTime<Utc>,
    payload_type: String,
    payload_revision: Option<String>,
    payload: JsonValue,
    meta_data: JsonValue,
}

impl<'r> sqlx::FromRow<'r, PgRow> for EventEntryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(EventEntryRow {
            event_identifier: row.try_get("event_identifier")?,
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_identifier: row.try_get("aggregate_identifier")?,
            sequence_number: row.try_get("sequence_number")?,
            time_stamp: row.try_get("time_stamp")?,
            payload_type: row.try_get("payload_type")?,
            payload_revision: row.try_get("payload_revision")?,
            payload: row.try_get("payload")?,
            meta_data: row.try_get("meta_data")?,
        })
    }
}

impl TryFrom<EventEntryRow> for EventEntry {
    type Error = StorageError;

    fn try_from(row: EventEntryRow) -> Result<Self, Self::Error> {
        Ok(EventEntry {
            event_identifier: EventId::from_uuid(row.event_identifier),
            aggregate_type: row.aggregate_type,
            aggregate_identifier: AggregateId::new(row.aggregate_identifier),
            sequence_number: to_u64(row.sequence_number)?,
            timestamp: row.time_stamp,
            payload: SerializedObject::new(
                row.payload,
                SerializedType::new(row.payload_type, row.payload_revision),
            ),
            meta_data: row.meta_data,
        })
    }
}
