//! In-process audit trail of product domain events.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use catalog_core::error::DomainError;
use catalog_core::repository::StoredEvent;
use catalog_unit_of_work::event_bus::{DomainEventBusBuilder, DomainEventHandler};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

/// Every internal product event type.
pub const PRODUCT_EVENT_TYPES: [&str; 3] = [
    "product.created",
    "product.price_changed",
    "product.discontinued",
];

/// One audited domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    /// The product the event belongs to.
    pub aggregate_id: Uuid,
    /// Internal event type.
    pub event_type: String,
    /// Position in the product's stream.
    pub sequence_number: i64,
    /// Correlation ID of the command that raised the event.
    pub correlation_id: Uuid,
    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,
}

/// Keeps the most recent product domain events, newest last.
///
/// Runs before the commit, so an entry may describe an event whose
/// transaction later rolled back.
#[derive(Debug)]
pub struct AuditTrail {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl AuditTrail {
    /// Creates a trail holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Subscribes the trail to every product event type.
    #[must_use]
    pub fn subscribe(self: &Arc<Self>, mut builder: DomainEventBusBuilder) -> DomainEventBusBuilder {
        for event_type in PRODUCT_EVENT_TYPES {
            builder = builder.subscribe(event_type, Arc::clone(self) as Arc<dyn DomainEventHandler>);
        }
        builder
    }

    /// Snapshot of the retained entries, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DomainEventHandler for AuditTrail {
    async fn handle(&self, event: &StoredEvent) -> Result<(), DomainError> {
        info!(
            aggregate_id = %event.aggregate_id,
            event_type = %event.event_type,
            sequence_number = event.sequence_number,
            correlation_id = %event.correlation_id,
            "product event audited"
        );
        if self.capacity == 0 {
            return Ok(());
        }
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(AuditEntry {
            aggregate_id: event.aggregate_id,
            event_type: event.event_type.clone(),
            sequence_number: event.sequence_number,
            correlation_id: event.correlation_id,
            occurred_at: event.occurred_at,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_test_support::FixedClock;
    use catalog_unit_of_work::event_bus::DomainEventBus;

    fn stored(event_type: &str, sequence_number: i64) -> StoredEvent {
        StoredEvent {
            event_id: Uuid::new_v4(),
            aggregate_id: Uuid::nil(),
            event_type: event_type.to_owned(),
            payload: serde_json::json!({}),
            sequence_number,
            event_version: 1,
            correlation_id: Uuid::nil(),
            causation_id: Uuid::nil(),
            occurred_at: FixedClock::standard().0,
        }
    }

    #[tokio::test]
    async fn test_trail_subscribes_to_every_product_event() {
        // Arrange
        let trail = Arc::new(AuditTrail::new(10));
        let bus = trail.subscribe(DomainEventBus::builder()).build();

        // Act
        for (sequence, event_type) in PRODUCT_EVENT_TYPES.iter().enumerate() {
            bus.publish(&stored(event_type, i64::try_from(sequence).unwrap() + 1))
                .await
                .unwrap();
        }

        // Assert
        let types: Vec<String> = trail.recent().into_iter().map(|e| e.event_type).collect();
        assert_eq!(types, PRODUCT_EVENT_TYPES);
    }

    #[tokio::test]
    async fn test_trail_drops_oldest_entries_beyond_capacity() {
        let trail = AuditTrail::new(2);

        for sequence in 1..=3 {
            trail
                .handle(&stored("product.price_changed", sequence))
                .await
                .unwrap();
        }

        let sequences: Vec<i64> = trail
            .recent()
            .into_iter()
            .map(|e| e.sequence_number)
            .collect();
        assert_eq!(sequences, vec![2, 3]);
    }
}
