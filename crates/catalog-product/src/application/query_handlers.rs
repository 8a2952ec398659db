//! Query handlers for the Product context.
//!
//! Reconstitutes products from stored events and returns read-only views.

use catalog_core::aggregate::AggregateRoot;
use catalog_core::error::DomainError;
use catalog_core::repository::EventRepository;
use serde::Serialize;
use uuid::Uuid;

use crate::application::command_handlers;

/// Read-only view of a product aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductView {
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
    /// Whether the product was withdrawn from sale.
    pub discontinued: bool,
    /// Current version (event count).
    pub version: i64,
}

/// Retrieves a product by its aggregate ID.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if no events exist for the ID.
/// Returns `DomainError::Infrastructure` if event deserialization fails.
pub async fn get_product_by_id(
    product_id: Uuid,
    repo: &dyn EventRepository,
) -> Result<ProductView, DomainError> {
    let stored_events = repo.load_events(product_id).await?;
    if stored_events.is_empty() {
        return Err(DomainError::AggregateNotFound(product_id));
    }
    let product = command_handlers::reconstitute(product_id, &stored_events)?;
    Ok(ProductView {
        product_id,
        sku: product.sku.clone(),
        name: product.name.clone(),
        price_cents: product.price_cents,
        currency: product.currency.clone(),
        discontinued: product.discontinued,
        version: product.version(),
    })
}

#[cfg(test)]
mod tests {
    use catalog_core::error::DomainError;
    use catalog_core::repository::StoredEvent;
    use uuid::Uuid;

    use crate::application::query_handlers::get_product_by_id;
    use crate::domain::events::{PriceChanged, ProductCreated, ProductEventKind};
    use catalog_test_support::{EmptyEventRepository, FailingEventRepository, FixedClock, InMemoryEventStore};

    fn stored(product_id: Uuid, sequence_number: i64, kind: &ProductEventKind) -> StoredEvent {
        StoredEvent {
            event_id: Uuid::new_v4(),
            aggregate_id: product_id,
            event_type: kind.event_type().to_owned(),
            payload: serde_json::to_value(kind).unwrap(),
            sequence_number,
            event_version: 1,
            correlation_id: Uuid::new_v4(),
            causation_id: Uuid::new_v4(),
            occurred_at: FixedClock::standard().0,
        }
    }

    #[tokio::test]
    async fn test_get_product_by_id_returns_view_with_state() {
        // Arrange
        let product_id = Uuid::new_v4();
        let store = InMemoryEventStore::new();
        store.seed(
            product_id,
            vec![
                stored(
                    product_id,
                    1,
                    &ProductEventKind::ProductCreated(ProductCreated {
                        product_id,
                        sku: "SKU-100".into(),
                        name: "Trail Shoe".into(),
                        price_cents: 12_999,
                        currency: "USD".into(),
                    }),
                ),
                stored(
                    product_id,
                    2,
                    &ProductEventKind::PriceChanged(PriceChanged {
                        product_id,
                        old_price_cents: 12_999,
                        new_price_cents: 9_999,
                    }),
                ),
            ],
        );

        // Act
        let view = get_product_by_id(product_id, &store).await.unwrap();

        // Assert
        assert_eq!(view.product_id, product_id);
        assert_eq!(view.sku, "SKU-100");
        assert_eq!(view.price_cents, 9_999);
        assert!(!view.discontinued);
        assert_eq!(view.version, 2);
    }

    #[tokio::test]
    async fn test_get_product_by_id_returns_not_found_when_no_events() {
        // Arrange
        let product_id = Uuid::new_v4();
        let repo = EmptyEventRepository;

        // Act
        let result = get_product_by_id(product_id, &repo).await;

        // Assert
        match result.unwrap_err() {
            DomainError::AggregateNotFound(id) => assert_eq!(id, product_id),
            other => panic!("expected AggregateNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_product_by_id_propagates_repository_failure() {
        let result = get_product_by_id(Uuid::new_v4(), &FailingEventRepository).await;

        assert!(matches!(result, Err(DomainError::Infrastructure(_))));
    }
}
