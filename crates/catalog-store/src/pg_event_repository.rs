//! `PostgreSQL` implementation of the event persistence traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use tracing::debug;
use uuid::Uuid;

use catalog_core::error::DomainError;
use catalog_core::repository::{EventRepository, StoredEvent, Transaction, TransactionManager};

use crate::schema::UNIQUE_VIOLATION;

fn infrastructure(err: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(format!("event store: {err}"))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

#[derive(sqlx::FromRow)]
struct EventRow {
    event_id: Uuid,
    aggregate_id: Uuid,
    event_type: String,
    payload: serde_json::Value,
    sequence_number: i64,
    event_version: i32,
    correlation_id: Uuid,
    causation_id: Uuid,
    occurred_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for StoredEvent {
    type Error = DomainError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let event_version = u32::try_from(row.event_version).map_err(|_| {
            DomainError::Infrastructure(format!(
                "event {} has negative version {}",
                row.event_id, row.event_version
            ))
        })?;
        Ok(Self {
            event_id: row.event_id,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            payload: row.payload,
            sequence_number: row.sequence_number,
            event_version,
            correlation_id: row.correlation_id,
            causation_id: row.causation_id,
            occurred_at: row.occurred_at,
        })
    }
}

/// PostgreSQL-backed event repository.
#[derive(Debug, Clone)]
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    /// Creates a new `PgEventRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, DomainError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r"SELECT event_id, aggregate_id, event_type, payload, sequence_number,
                     event_version, correlation_id, causation_id, occurred_at
                FROM domain_events
               WHERE aggregate_id = $1
            ORDER BY sequence_number",
        )
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;
        rows.into_iter().map(StoredEvent::try_from).collect()
    }
}

/// Opens PostgreSQL transactions for the unit of work.
#[derive(Debug, Clone)]
pub struct PgTransactionManager {
    pool: PgPool,
}

impl PgTransactionManager {
    /// Creates a new `PgTransactionManager`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionManager for PgTransactionManager {
    async fn begin(&self) -> Result<Box<dyn Transaction>, DomainError> {
        let tx = self.pool.begin().await.map_err(infrastructure)?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

/// An open PostgreSQL transaction.
///
/// Appends take a transaction-scoped advisory lock on the aggregate, so the
/// version check and the inserts cannot interleave with another writer of the
/// same stream. The `(aggregate_id, sequence_number)` unique constraint
/// backs this up.
struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn append_events(
        &mut self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: &[StoredEvent],
    ) -> Result<(), DomainError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(aggregate_id)
            .execute(&mut *self.tx)
            .await
            .map_err(infrastructure)?;

        let actual: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence_number), 0) FROM domain_events WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(infrastructure)?;
        if actual != expected_version {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }

        for event in events {
            let event_version = i32::try_from(event.event_version).map_err(|_| {
                DomainError::Validation(format!(
                    "event version {} does not fit the store",
                    event.event_version
                ))
            })?;
            sqlx::query(
                r"INSERT INTO domain_events
                    (event_id, aggregate_id, event_type, payload, sequence_number,
                     event_version, correlation_id, causation_id, occurred_at)
                  VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(event.event_id)
            .bind(event.aggregate_id)
            .bind(&event.event_type)
            .bind(&event.payload)
            .bind(event.sequence_number)
            .bind(event_version)
            .bind(event.correlation_id)
            .bind(event.causation_id)
            .bind(event.occurred_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    DomainError::ConcurrencyConflict {
                        aggregate_id,
                        expected: expected_version,
                        actual: event.sequence_number,
                    }
                } else {
                    infrastructure(err)
                }
            })?;
        }

        debug!(
            aggregate_id = %aggregate_id,
            count = events.len(),
            expected_version,
            "events appended"
        );
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        self.tx.commit().await.map_err(infrastructure)
    }

    async fn rollback(self: Box<Self>) -> Result<(), DomainError> {
        self.tx.rollback().await.map_err(infrastructure)
    }
}
