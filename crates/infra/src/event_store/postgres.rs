//! Postgres-backed event store.
//!
//! Schema lives in `migrations/0001_event_store.sql` and is applied by
//! [`PostgresEventStore::ensure_schema`]. The unique constraint on
//! `(tenant_id, aggregate_id, sequence_number)` is what catches concurrent
//! appends that slip past the version check.
//!
//! | SQLx error | Postgres code | `EventStoreError` |
//! |---|---|---|
//! | unique violation | `23505` | `Concurrency` |
//! | check violation | `23514` | `InvalidAppend` |
//! | other database error | any | `Storage` |
//! | pool closed, io, ... | n/a | `Storage` |

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use kedai_core::{AggregateId, ExpectedVersion, TenantId};

use super::query::{EventFilter, EventQuery, EventQueryResult, Pagination};
use super::r#trait::{batch_stream, EventStore, EventStoreError, StoredEvent, UncommittedEvent};

const SCHEMA: &str = include_str!("../../migrations/0001_event_store.sql");

const EVENT_COLUMNS: &str = "event_id, tenant_id, aggregate_id, aggregate_type, sequence_number, \
     event_type, event_version, occurred_at, payload";

/// Append-only store on a Postgres `events` table. Every statement carries
/// `tenant_id` in its WHERE clause.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, EventStoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Creates the table and indexes when missing.
    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn fetch_events(
        &self,
        operation: &str,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        rows.iter().map(decode_row).collect()
    }
}

#[async_trait::async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(skip(self, events), fields(event_count = events.len()), err)]
    async fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let Some((tenant_id, aggregate_id, aggregate_type)) = batch_stream(&events)? else {
            return Ok(vec![]);
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let (current_version, existing_type) =
            check_stream_version(&mut tx, tenant_id, aggregate_id).await?;

        if let Some(existing) = existing_type {
            if existing != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{existing}', attempted append with '{aggregate_type}'"
                )));
            }
        }

        if !expected_version.matches(current_version) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current_version}"
            )));
        }

        let mut committed = Vec::with_capacity(events.len());
        let mut next = current_version + 1;

        for event in events {
            sqlx::query(
                r#"
                INSERT INTO events (
                    event_id, tenant_id, aggregate_id, aggregate_type, sequence_number,
                    event_type, event_version, occurred_at, payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(event.event_id)
            .bind(tenant_id.as_uuid())
            .bind(aggregate_id.as_uuid())
            .bind(&aggregate_type)
            .bind(next as i64)
            .bind(&event.event_type)
            .bind(event.event_version as i32)
            .bind(event.occurred_at)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    EventStoreError::Concurrency(format!(
                        "concurrent append detected: sequence_number {next} already exists"
                    ))
                } else {
                    map_sqlx_error("insert_event", e)
                }
            })?;

            committed.push(StoredEvent {
                event_id: event.event_id,
                tenant_id: event.tenant_id,
                aggregate_id: event.aggregate_id,
                aggregate_type: event.aggregate_type,
                sequence_number: next,
                event_type: event.event_type,
                event_version: event.event_version,
                occurred_at: event.occurred_at,
                payload: event.payload,
            });
            next += 1;
        }

        // Dropping `tx` on any early return above rolls it back.
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(committed)
    }

    #[instrument(skip(self), err)]
    async fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE tenant_id = $1 AND aggregate_id = $2 ORDER BY sequence_number ASC"
        );
        self.fetch_events(
            "load_stream",
            sqlx::query(&sql).bind(tenant_id.as_uuid()).bind(aggregate_id.as_uuid()),
        )
        .await
    }

    #[instrument(skip(self), err)]
    async fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY global_position ASC");
        self.fetch_events("load_all", sqlx::query(&sql)).await
    }
}

#[async_trait::async_trait]
impl EventQuery for PostgresEventStore {
    async fn query_events(
        &self,
        tenant_id: TenantId,
        filter: EventFilter,
        pagination: Pagination,
    ) -> Result<EventQueryResult, EventStoreError> {
        let agg_id: Option<Uuid> = filter.aggregate_id.map(|id| *id.as_uuid());
        let agg_type = filter.aggregate_type.as_deref();
        let evt_type = filter.event_type.as_deref();

        const WHERE: &str = "WHERE tenant_id = $1
                AND ($2::uuid IS NULL OR aggregate_id = $2)
                AND ($3::text IS NULL OR aggregate_type = $3)
                AND ($4::text IS NULL OR event_type = $4)
                AND ($5::timestamptz IS NULL OR occurred_at >= $5)
                AND ($6::timestamptz IS NULL OR occurred_at <= $6)";

        let count_sql = format!("SELECT COUNT(*) AS total FROM events {WHERE}");
        let total: i64 = sqlx::query(&count_sql)
            .bind(tenant_id.as_uuid())
            .bind(agg_id)
            .bind(agg_type)
            .bind(evt_type)
            .bind(filter.occurred_after)
            .bind(filter.occurred_before)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_events", e))?
            .try_get("total")
            .map_err(|e| EventStoreError::Storage(format!("failed to read count: {e}")))?;

        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events {WHERE} \
             ORDER BY occurred_at DESC, sequence_number ASC LIMIT $7 OFFSET $8"
        );
        let events = self
            .fetch_events(
                "query_events",
                sqlx::query(&sql)
                    .bind(tenant_id.as_uuid())
                    .bind(agg_id)
                    .bind(agg_type)
                    .bind(evt_type)
                    .bind(filter.occurred_after)
                    .bind(filter.occurred_before)
                    .bind(i64::from(pagination.limit))
                    .bind(i64::from(pagination.offset)),
            )
            .await?;

        Ok(EventQueryResult {
            events,
            total: total as u64,
            pagination,
            has_more: total > i64::from(pagination.offset) + i64::from(pagination.limit),
        })
    }

    async fn get_aggregate_events(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        pagination: Option<Pagination>,
    ) -> Result<EventQueryResult, EventStoreError> {
        let pagination = pagination.unwrap_or_default();

        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS total FROM events WHERE tenant_id = $1 AND aggregate_id = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(aggregate_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_aggregate_events", e))?
        .try_get("total")
        .map_err(|e| EventStoreError::Storage(format!("failed to read count: {e}")))?;

        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE tenant_id = $1 AND aggregate_id = $2 \
             ORDER BY sequence_number ASC LIMIT $3 OFFSET $4"
        );
        let events = self
            .fetch_events(
                "get_aggregate_events",
                sqlx::query(&sql)
                    .bind(tenant_id.as_uuid())
                    .bind(aggregate_id.as_uuid())
                    .bind(i64::from(pagination.limit))
                    .bind(i64::from(pagination.offset)),
            )
            .await?;

        Ok(EventQueryResult {
            events,
            total: total as u64,
            pagination,
            has_more: total > i64::from(pagination.offset) + i64::from(pagination.limit),
        })
    }

    async fn get_event_by_id(
        &self,
        tenant_id: TenantId,
        event_id: Uuid,
    ) -> Result<Option<StoredEvent>, EventStoreError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE tenant_id = $1 AND event_id = $2 LIMIT 1");
        let row = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_event_by_id", e))?;
        row.as_ref().map(decode_row).transpose()
    }
}

/// Current revision of a stream and its aggregate type (`0` / `None` when
/// the stream does not exist).
async fn check_stream_version(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
) -> Result<(u64, Option<String>), EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(MAX(sequence_number), 0) AS current_version,
            MAX(aggregate_type) AS aggregate_type
        FROM events
        WHERE tenant_id = $1 AND aggregate_id = $2
        "#,
    )
    .bind(tenant_id.as_uuid())
    .bind(aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_stream_version", e))?;

    let current_version: i64 = row
        .try_get("current_version")
        .map_err(|e| EventStoreError::Storage(format!("failed to read current_version: {e}")))?;
    let aggregate_type: Option<String> = row
        .try_get("aggregate_type")
        .map_err(|e| EventStoreError::Storage(format!("failed to read aggregate_type: {e}")))?;

    Ok((current_version as u64, aggregate_type))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => EventStoreError::Concurrency(msg),
                Some("23514") => EventStoreError::InvalidAppend(msg),
                _ => EventStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => EventStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

#[derive(Debug)]
struct StoredEventRow {
    event_id: Uuid,
    tenant_id: Uuid,
    aggregate_id: Uuid,
    aggregate_type: String,
    sequence_number: i64,
    event_type: String,
    event_version: i32,
    occurred_at: DateTime<Utc>,
    payload: serde_json::Value,
}

impl<'r> FromRow<'r, PgRow> for StoredEventRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEventRow {
            event_id: row.try_get("event_id")?,
            tenant_id: row.try_get("tenant_id")?,
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            sequence_number: row.try_get("sequence_number")?,
            event_type: row.try_get("event_type")?,
            event_version: row.try_get("event_version")?,
            occurred_at: row.try_get("occurred_at")?,
            payload: row.try_get("payload")?,
        })
    }
}

impl From<StoredEventRow> for StoredEvent {
    fn from(row: StoredEventRow) -> Self {
        StoredEvent {
            event_id: row.event_id,
            tenant_id: TenantId::from_uuid(row.tenant_id),
            aggregate_id: AggregateId::from_uuid(row.aggregate_id),
            aggregate_type: row.aggregate_type,
            sequence_number: row.sequence_number as u64,
            event_type: row.event_type,
            event_version: row.event_version as u32,
            occurred_at: row.occurred_at,
            payload: row.payload,
        }
    }
}

fn decode_row(row: &PgRow) -> Result<StoredEvent, EventStoreError> {
    StoredEventRow::from_row(row)
        .map(StoredEvent::from)
        .map_err(|e| EventStoreError::Storage(format!("failed to decode event row: {e}")))
}
