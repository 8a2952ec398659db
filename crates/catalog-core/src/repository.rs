//! Event persistence abstractions.
//!
//! Reads go through [`EventRepository`]; writes only ever happen inside a
//! [`Transaction`] opened by a [`TransactionManager`], which is what lets the
//! unit of work order event publication around the commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::DomainEvent;

/// Stored representation of a domain event.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Aggregate this event belongs to.
    pub aggregate_id: Uuid,
    /// Event type name for deserialization routing.
    pub event_type: String,
    /// Serialized event payload.
    pub payload: serde_json::Value,
    /// Sequence number within the aggregate stream.
    pub sequence_number: i64,
    /// Schema version of the payload.
    pub event_version: u32,
    /// Correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Causation ID linking to the causing event/command.
    pub causation_id: Uuid,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Builds the stored form of a domain event.
    pub fn from_event(event: &dyn DomainEvent) -> Self {
        let meta = event.metadata();
        Self {
            event_id: meta.event_id,
            aggregate_id: meta.aggregate_id,
            event_type: event.event_type().to_owned(),
            payload: event.to_payload(),
            sequence_number: meta.sequence_number,
            event_version: meta.event_version,
            correlation_id: meta.correlation_id,
            causation_id: meta.causation_id,
            occurred_at: meta.occurred_at,
        }
    }
}

/// Read access to aggregate event streams.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Load all events for a given aggregate, ordered by sequence number.
    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, DomainError>;
}

/// An open persistence transaction.
#[async_trait]
pub trait Transaction: Send {
    /// Append new events to an aggregate stream with optimistic concurrency.
    /// `expected_version` is the last sequence number known to be stored.
    async fn append_events(
        &mut self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: &[StoredEvent],
    ) -> Result<(), DomainError>;

    /// Makes every append in this transaction durable.
    async fn commit(self: Box<Self>) -> Result<(), DomainError>;

    /// Discards every append in this transaction.
    async fn rollback(self: Box<Self>) -> Result<(), DomainError>;
}

/// Opens persistence transactions.
#[async_trait]
pub trait TransactionManager: Send + Sync {
    /// Begins a new transaction.
    async fn begin(&self) -> Result<Box<dyn Transaction>, DomainError>;
}
