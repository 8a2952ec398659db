//! Domain events for the Product context.

use catalog_core::event::{DomainEvent, EventMetadata, IntegrationEvent};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public name of the integration event emitted when a product is created.
pub const PRODUCT_CREATED: &str = "catalog.product.created";
/// Public name of the integration event emitted when a price changes.
pub const PRODUCT_PRICE_CHANGED: &str = "catalog.product.price_changed";
/// Public name of the integration event emitted when a product is discontinued.
pub const PRODUCT_DISCONTINUED: &str = "catalog.product.discontinued";

/// Schema version of every product integration event payload.
pub const INTEGRATION_EVENT_VERSION: u32 = 1;

/// Emitted when a product is added to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductCreated {
    /// The product identifier.
    pub product_id: Uuid,
    /// Stock keeping unit.
    pub sku: String,
    /// Display name.
    pub name: String,
    /// Price in minor currency units.
    pub price_cents: i64,
    /// ISO 4217 currency code.
    pub currency: String,
}

/// Emitted when a product's price changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChanged {
    /// The product identifier.
    pub product_id: Uuid,
    /// Price before the change, in minor units.
    pub old_price_cents: i64,
    /// Price after the change, in minor units.
    pub new_price_cents: i64,
}

/// Emitted when a product is withdrawn from sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDiscontinued {
    /// The product identifier.
    pub product_id: Uuid,
    /// Optional free-text reason.
    pub reason: Option<String>,
}

/// Event payload variants for the Product context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProductEventKind {
    /// A product was created.
    ProductCreated(ProductCreated),
    /// A product was repriced.
    PriceChanged(PriceChanged),
    /// A product was discontinued.
    ProductDiscontinued(ProductDiscontinued),
}

impl ProductEventKind {
    /// Internal type tag used for in-process routing and storage.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ProductCreated(_) => "product.created",
            Self::PriceChanged(_) => "product.price_changed",
            Self::ProductDiscontinued(_) => "product.discontinued",
        }
    }

    /// Public name the event is published under.
    #[must_use]
    pub fn integration_name(&self) -> &'static str {
        match self {
            Self::ProductCreated(_) => PRODUCT_CREATED,
            Self::PriceChanged(_) => PRODUCT_PRICE_CHANGED,
            Self::ProductDiscontinued(_) => PRODUCT_DISCONTINUED,
        }
    }

    /// The variant's body without the enum tag; this is the shape other
    /// services receive.
    fn body(&self) -> serde_json::Value {
        let value = match self {
            Self::ProductCreated(body) => serde_json::to_value(body),
            Self::PriceChanged(body) => serde_json::to_value(body),
            Self::ProductDiscontinued(body) => serde_json::to_value(body),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

/// Domain event envelope for the Product context.
#[derive(Debug, Clone)]
pub struct ProductEvent {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub kind: ProductEventKind,
}

impl DomainEvent for ProductEvent {
    fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    fn to_payload(&self) -> serde_json::Value {
        // Plain derived structs with string keys always serialize.
        serde_json::to_value(&self.kind).unwrap_or(serde_json::Value::Null)
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn to_integration_event(&self) -> Option<IntegrationEvent> {
        Some(IntegrationEvent {
            event_name: self.kind.integration_name().to_owned(),
            aggregate_id: self.metadata.aggregate_id,
            payload: self.kind.body(),
            occurred_on: self.metadata.occurred_at,
            event_version: INTEGRATION_EVENT_VERSION,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_test_support::FixedClock;

    #[test]
    fn test_integration_event_carries_untagged_body() {
        // Arrange
        let product_id = Uuid::new_v4();
        let event = ProductEvent {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_type: "product.price_changed".to_owned(),
                aggregate_id: product_id,
                sequence_number: 2,
                event_version: 1,
                correlation_id: Uuid::new_v4(),
                causation_id: Uuid::new_v4(),
                occurred_at: FixedClock::standard().0,
            },
            kind: ProductEventKind::PriceChanged(PriceChanged {
                product_id,
                old_price_cents: 1299,
                new_price_cents: 999,
            }),
        };

        // Act
        let integration = event.to_integration_event().unwrap();

        // Assert
        assert_eq!(integration.event_name, "catalog.product.price_changed");
        assert_eq!(integration.aggregate_id, product_id);
        assert_eq!(integration.event_version, 1);
        assert_eq!(integration.occurred_on, FixedClock::standard().0);
        assert_eq!(integration.payload["new_price_cents"], 999);
        assert!(event.to_payload().get("PriceChanged").is_some());
    }
}
