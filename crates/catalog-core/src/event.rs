//! Domain and integration event abstractions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata attached to every domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Type tag used for in-process routing and deserialization.
    pub event_type: String,
    /// Aggregate/stream this event belongs to.
    pub aggregate_id: Uuid,
    /// Monotonically increasing version within the aggregate stream.
    pub sequence_number: i64,
    /// Schema version of the event payload.
    pub event_version: u32,
    /// Correlation ID for tracing a command through its effects.
    pub correlation_id: Uuid,
    /// Causation ID linking this event to the event/command that caused it.
    pub causation_id: Uuid,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

/// Trait that all domain events implement.
pub trait DomainEvent: Send + Sync + std::fmt::Debug {
    /// Returns the event type tag.
    fn event_type(&self) -> &'static str;

    /// Serializes the event payload to JSON.
    fn to_payload(&self) -> serde_json::Value;

    /// Returns the metadata for this event.
    fn metadata(&self) -> &EventMetadata;

    /// Returns the externally published counterpart of this event, if the
    /// event crosses the service boundary at all.
    fn to_integration_event(&self) -> Option<IntegrationEvent> {
        None
    }
}

/// Serialized, externally visible form of a domain event handed to the
/// outbound transport once the owning transaction has committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationEvent {
    /// Public event name, e.g. `catalog.product.created`.
    pub event_name: String,
    /// Aggregate the event originated from; used as the partition key.
    pub aggregate_id: Uuid,
    /// Event payload.
    pub payload: serde_json::Value,
    /// When the originating domain event occurred.
    pub occurred_on: DateTime<Utc>,
    /// Schema version of the payload.
    pub event_version: u32,
}

impl IntegrationEvent {
    /// Derives an integration event from a domain event, reusing its payload,
    /// timestamp and version.
    pub fn from_domain_event(event_name: impl Into<String>, event: &dyn DomainEvent) -> Self {
        let meta = event.metadata();
        Self {
            event_name: event_name.into(),
            aggregate_id: meta.aggregate_id,
            payload: event.to_payload(),
            occurred_on: meta.occurred_at,
            event_version: meta.event_version,
        }
    }

    /// Serializes the event to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error if the payload cannot be
    /// encoded.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses an integration event from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error for malformed input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
