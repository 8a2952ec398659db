//! Outbound publication of integration events.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use catalog_core::error::DomainError;
use catalog_core::event::IntegrationEvent;
use catalog_messaging::message::OutboundMessage;
use catalog_messaging::transport::Transport;
use tracing::debug;

/// Header carrying the integration event name.
pub const EVENT_NAME_HEADER: &str = "x-event-name";
/// Header carrying the integration event schema version.
pub const EVENT_VERSION_HEADER: &str = "x-event-version";

/// Sends integration events to other services.
#[async_trait]
pub trait IntegrationEventPublisher: Send + Sync {
    /// Publishes one event.
    async fn publish(&self, event: &IntegrationEvent) -> Result<(), DomainError>;
}

/// Publishes integration events as JSON onto the log transport, keyed by
/// aggregate id so every event of an aggregate lands on one partition.
pub struct TransportIntegrationPublisher {
    transport: Arc<dyn Transport>,
    default_topic: String,
    routes: HashMap<String, String>,
}

impl TransportIntegrationPublisher {
    /// Publishes every event to `default_topic`.
    pub fn new(transport: Arc<dyn Transport>, default_topic: impl Into<String>) -> Self {
        Self {
            transport,
            default_topic: default_topic.into(),
            routes: HashMap::new(),
        }
    }

    /// Sends events named `event_name` to `topic` instead of the default.
    #[must_use]
    pub fn route(mut self, event_name: &str, topic: impl Into<String>) -> Self {
        self.routes.insert(event_name.to_owned(), topic.into());
        self
    }

    /// Topic an event is published to.
    #[must_use]
    pub fn topic_for(&self, event_name: &str) -> &str {
        self.routes
            .get(event_name)
            .map_or(self.default_topic.as_str(), String::as_str)
    }
}

#[async_trait]
impl IntegrationEventPublisher for TransportIntegrationPublisher {
    async fn publish(&self, event: &IntegrationEvent) -> Result<(), DomainError> {
        let topic = self.topic_for(&event.event_name).to_owned();
        let payload = event.to_bytes().map_err(|e| {
            DomainError::Infrastructure(format!("integration event serialization failed: {e}"))
        })?;
        let message = OutboundMessage::new(topic.clone(), payload)
            .with_key(event.aggregate_id.to_string())
            .with_header(EVENT_NAME_HEADER, event.event_name.as_str())
            .with_header(EVENT_VERSION_HEADER, event.event_version.to_string());
        self.transport
            .publish(message)
            .await
            .map_err(|e| DomainError::Infrastructure(e.to_string()))?;
        debug!(
            topic = %topic,
            event_name = %event.event_name,
            aggregate_id = %event.aggregate_id,
            "integration event published"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_messaging::memory::InMemoryLog;
    use catalog_test_support::FixedClock;
    use uuid::Uuid;

    fn event(name: &str) -> IntegrationEvent {
        IntegrationEvent {
            event_name: name.to_owned(),
            aggregate_id: Uuid::new_v4(),
            payload: serde_json::json!({ "sku": "SKU-1" }),
            occurred_on: FixedClock::standard().0,
            event_version: 1,
        }
    }

    #[tokio::test]
    async fn test_publishes_json_keyed_by_aggregate() {
        // Arrange
        let log = InMemoryLog::new();
        let publisher = TransportIntegrationPublisher::new(Arc::new(log.clone()), "catalog.products");
        let event = event("catalog.product.created");

        // Act
        publisher.publish(&event).await.unwrap();

        // Assert
        let messages = log.topic_messages("catalog.products");
        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.key_text(), event.aggregate_id.to_string());
        assert_eq!(
            message.header_str(EVENT_NAME_HEADER),
            Some("catalog.product.created")
        );
        assert_eq!(message.header_str(EVENT_VERSION_HEADER), Some("1"));
        assert_eq!(IntegrationEvent::from_bytes(&message.value).unwrap(), event);
    }

    #[tokio::test]
    async fn test_routes_override_default_topic() {
        let log = InMemoryLog::new();
        let publisher = TransportIntegrationPublisher::new(Arc::new(log.clone()), "catalog.products")
            .route("catalog.product.discontinued", "catalog.discontinued");

        publisher
            .publish(&event("catalog.product.discontinued"))
            .await
            .unwrap();

        assert_eq!(log.topic_messages("catalog.discontinued").len(), 1);
        assert!(log.topic_messages("catalog.products").is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_is_infrastructure_error() {
        let log = InMemoryLog::new();
        log.reject_publishes("catalog.products", 1);
        let publisher = TransportIntegrationPublisher::new(Arc::new(log), "catalog.products");

        let result = publisher.publish(&event("catalog.product.created")).await;

        assert!(matches!(result, Err(DomainError::Infrastructure(_))));
    }
}
