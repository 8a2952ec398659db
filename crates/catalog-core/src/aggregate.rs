//! Aggregate root abstraction.

use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::event::{DomainEvent, IntegrationEvent};
use crate::repository::StoredEvent;

/// Events recorded by an aggregate since its last commit.
///
/// The buffer owns the events; `dispatched` is a monotonic index splitting it
/// into events already delivered to in-process handlers and events still
/// waiting. An event before the marker is never handed out again.
#[derive(Debug)]
pub struct EventLog<E> {
    events: Vec<E>,
    dispatched: usize,
}

impl<E> EventLog<E> {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            dispatched: 0,
        }
    }

    /// Appends a newly raised event.
    pub fn record(&mut self, event: E) {
        self.events.push(event);
    }

    /// Every event recorded since the last commit.
    #[must_use]
    pub fn pending(&self) -> &[E] {
        &self.events
    }

    /// Events already delivered to in-process handlers.
    #[must_use]
    pub fn dispatched(&self) -> &[E] {
        &self.events[..self.dispatched]
    }

    /// Events not yet delivered to in-process handlers.
    #[must_use]
    pub fn undispatched(&self) -> &[E] {
        &self.events[self.dispatched..]
    }

    /// Advances the dispatched marker by `count`, never past the end.
    pub fn mark_dispatched(&mut self, count: usize) {
        self.dispatched = (self.dispatched + count).min(self.events.len());
    }

    /// Number of events recorded since the last commit.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if nothing was recorded since the last commit.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drops every recorded event and resets the marker.
    pub fn clear(&mut self) {
        self.events.clear();
        self.dispatched = 0;
    }
}

impl<E> Default for EventLog<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Trait for aggregate roots that reconstitute from event history.
///
/// Domain methods build an event, `apply` it and `record` it in the log, so
/// `version` always includes pending events.
pub trait AggregateRoot: Send + Sync {
    /// The event type this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> Uuid;

    /// Returns the current version (number of events applied).
    fn version(&self) -> i64;

    /// Apply an event to mutate internal state.
    fn apply(&mut self, event: &Self::Event);

    /// Events recorded since the last commit.
    fn event_log(&self) -> &EventLog<Self::Event>;

    /// Mutable access to the event log.
    fn event_log_mut(&mut self) -> &mut EventLog<Self::Event>;

    /// Returns events recorded but not yet dispatched in-process.
    fn uncommitted_events(&self) -> &[Self::Event] {
        self.event_log().undispatched()
    }

    /// Clears the event log after the unit of work closes.
    fn clear_uncommitted_events(&mut self) {
        self.event_log_mut().clear();
    }
}

/// Object-safe view of an aggregate used by the unit of work, which has to
/// hold aggregates of unrelated event types side by side.
pub trait TrackedAggregate: Send + Sync {
    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> Uuid;

    /// The stream version the store must hold for pending events to append.
    fn expected_version(&self) -> i64;

    /// Pending events not yet dispatched in-process, in recording order.
    fn undispatched_events(&self) -> Vec<StoredEvent>;

    /// Marks the next `count` undispatched events as dispatched.
    fn mark_dispatched(&mut self, count: usize);

    /// Every pending event, for persistence.
    fn pending_events(&self) -> Vec<StoredEvent>;

    /// Integration counterparts of every pending event.
    fn integration_events(&self) -> Vec<IntegrationEvent>;

    /// Discards all pending events.
    fn clear_events(&mut self);
}

impl<A: AggregateRoot> TrackedAggregate for A {
    fn aggregate_id(&self) -> Uuid {
        AggregateRoot::aggregate_id(self)
    }

    #[allow(clippy::cast_possible_wrap)]
    fn expected_version(&self) -> i64 {
        self.version() - self.event_log().len() as i64
    }

    fn undispatched_events(&self) -> Vec<StoredEvent> {
        self.event_log()
            .undispatched()
            .iter()
            .map(|event| StoredEvent::from_event(event))
            .collect()
    }

    fn mark_dispatched(&mut self, count: usize) {
        self.event_log_mut().mark_dispatched(count);
    }

    fn pending_events(&self) -> Vec<StoredEvent> {
        self.event_log()
            .pending()
            .iter()
            .map(|event| StoredEvent::from_event(event))
            .collect()
    }

    fn integration_events(&self) -> Vec<IntegrationEvent> {
        self.event_log()
            .pending()
            .iter()
            .filter_map(DomainEvent::to_integration_event)
            .collect()
    }

    fn clear_events(&mut self) {
        self.clear_uncommitted_events();
    }
}

/// Shared handle to an aggregate registered in a unit of work.
pub type SharedAggregate = Arc<Mutex<dyn TrackedAggregate>>;

/// Wraps an aggregate in the shared handle expected by the unit of work.
pub fn shared<A: AggregateRoot + 'static>(aggregate: A) -> Arc<Mutex<A>> {
    Arc::new(Mutex::new(aggregate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventMetadata;
    use chrono::Utc;

    #[derive(Debug)]
    struct Incremented {
        metadata: EventMetadata,
    }

    impl DomainEvent for Incremented {
        fn event_type(&self) -> &'static str {
            "counter.incremented"
        }

        fn to_payload(&self) -> serde_json::Value {
            serde_json::json!({})
        }

        fn metadata(&self) -> &EventMetadata {
            &self.metadata
        }

        fn to_integration_event(&self) -> Option<IntegrationEvent> {
            Some(IntegrationEvent::from_domain_event("counter.incremented", self))
        }
    }

    struct Counter {
        id: Uuid,
        version: i64,
        log: EventLog<Incremented>,
    }

    impl Counter {
        fn increment(&mut self) {
            let event = Incremented {
                metadata: EventMetadata {
                    event_id: Uuid::new_v4(),
                    event_type: "counter.incremented".to_owned(),
                    aggregate_id: self.id,
                    sequence_number: self.version + 1,
                    event_version: 1,
                    correlation_id: Uuid::new_v4(),
                    causation_id: Uuid::new_v4(),
                    occurred_at: Utc::now(),
                },
            };
            self.apply(&event);
            self.log.record(event);
        }
    }

    impl AggregateRoot for Counter {
        type Event = Incremented;

        fn aggregate_id(&self) -> Uuid {
            self.id
        }

        fn version(&self) -> i64 {
            self.version
        }

        fn apply(&mut self, _event: &Self::Event) {
            self.version += 1;
        }

        fn event_log(&self) -> &EventLog<Self::Event> {
            &self.log
        }

        fn event_log_mut(&mut self) -> &mut EventLog<Self::Event> {
            &mut self.log
        }
    }

    fn counter_at_version(version: i64) -> Counter {
        Counter {
            id: Uuid::new_v4(),
            version,
            log: EventLog::new(),
        }
    }

    #[test]
    fn test_mark_dispatched_moves_events_out_of_uncommitted() {
        // Arrange
        let mut counter = counter_at_version(0);
        counter.increment();
        counter.increment();
        counter.increment();

        // Act
        counter.event_log_mut().mark_dispatched(2);

        // Assert
        assert_eq!(counter.event_log().dispatched().len(), 2);
        assert_eq!(counter.uncommitted_events().len(), 1);
        assert_eq!(counter.uncommitted_events()[0].metadata.sequence_number, 3);
        assert_eq!(counter.event_log().pending().len(), 3);
    }

    #[test]
    fn test_mark_dispatched_never_passes_the_end_of_the_log() {
        let mut log = EventLog::new();
        log.record(1);
        log.record(2);

        log.mark_dispatched(5);
        log.record(3);

        assert_eq!(log.dispatched(), &[1, 2]);
        assert_eq!(log.undispatched(), &[3]);
    }

    #[test]
    fn test_expected_version_excludes_pending_events() {
        // Arrange
        let mut counter = counter_at_version(4);

        // Act
        counter.increment();
        counter.increment();

        // Assert
        assert_eq!(counter.version(), 6);
        assert_eq!(TrackedAggregate::expected_version(&counter), 4);
        let pending = counter.pending_events();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].sequence_number, 5);
        assert_eq!(pending[1].sequence_number, 6);
    }

    #[test]
    fn test_clear_events_resets_log_and_marker() {
        let mut counter = counter_at_version(0);
        counter.increment();
        counter.mark_dispatched(1);

        counter.clear_events();
        counter.increment();

        assert!(counter.event_log().dispatched().is_empty());
        assert_eq!(counter.undispatched_events().len(), 1);
    }

    #[test]
    fn test_integration_events_cover_every_pending_event() {
        let mut counter = counter_at_version(0);
        counter.increment();
        counter.increment();
        counter.mark_dispatched(2);

        let integration = counter.integration_events();

        assert_eq!(integration.len(), 2);
        assert!(
            integration
                .iter()
                .all(|event| event.event_name == "counter.incremented")
        );
    }

    #[tokio::test]
    async fn test_shared_handle_coerces_to_tracked_aggregate() {
        let counter = shared(counter_at_version(0));
        counter.lock().await.increment();

        let tracked: SharedAggregate = counter.clone();

        assert_eq!(tracked.lock().await.pending_events().len(), 1);
    }
}
