//! Event store database schema.

/// SQL to create the events table. Kept in step with `migrations/`.
pub const CREATE_EVENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS domain_events (
    event_id        UUID PRIMARY KEY,
    aggregate_id    UUID NOT NULL,
    event_type      VARCHAR(255) NOT NULL,
    payload         JSONB NOT NULL,
    sequence_number BIGINT NOT NULL,
    event_version   INTEGER NOT NULL DEFAULT 1,
    correlation_id  UUID NOT NULL,
    causation_id    UUID NOT NULL,
    occurred_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (aggregate_id, sequence_number)
);

CREATE INDEX IF NOT EXISTS idx_domain_events_aggregate_id
    ON domain_events (aggregate_id, sequence_number);

CREATE INDEX IF NOT EXISTS idx_domain_events_correlation_id
    ON domain_events (correlation_id);
";

/// Unique-violation SQLSTATE raised when two writers race for one sequence
/// number.
pub(crate) const UNIQUE_VIOLATION: &str = "23505";

/// Creates the events table and its indexes if they are missing.
///
/// # Errors
///
/// Returns the underlying `sqlx` error if the statements fail.
pub async fn apply(pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(CREATE_EVENTS_TABLE).execute(pool).await?;
    tracing::info!("event store schema ready");
    Ok(())
}
