//! Aggregate roots for the Product context.

use catalog_core::aggregate::{AggregateRoot, EventLog};
use catalog_core::clock::Clock;
use catalog_core::error::DomainError;
use catalog_core::event::EventMetadata;
use uuid::Uuid;

use super::events::{
    PriceChanged, ProductCreated, ProductDiscontinued, ProductEvent, ProductEventKind,
};

const MAX_NAME_LEN: usize = 200;
const MAX_SKU_LEN: usize = 64;

/// The aggregate root for a catalog product.
#[derive(Debug)]
pub struct Product {
    /// Aggregate identifier.
    pub id: Uuid,
    /// Current version (event count, pending events included).
    pub(crate) version: i64,
    /// Whether a creation event has been applied.
    pub(crate) created: bool,
    /// Stock keeping unit.
    pub(crate) sku: String,
    /// Display name.
    pub(crate) name: String,
    /// Price in minor currency units.
    pub(crate) price_cents: i64,
    /// ISO 4217 currency code.
    pub(crate) currency: String,
    /// Whether the product was withdrawn from sale.
    pub(crate) discontinued: bool,
    log: EventLog<ProductEvent>,
}

fn validate_price(price_cents: i64) -> Result<(), DomainError> {
    if price_cents <= 0 {
        return Err(DomainError::Validation(format!(
            "price must be positive, got {price_cents}"
        )));
    }
    Ok(())
}

fn validate_currency(currency: &str) -> Result<(), DomainError> {
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(DomainError::Validation(format!(
            "currency must be a three-letter ISO 4217 code, got {currency:?}"
        )));
    }
    Ok(())
}

fn validate_text(field: &str, value: &str, max_len: usize) -> Result<(), DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::Validation(format!("{field} must not be empty")));
    }
    if trimmed.chars().count() > max_len {
        return Err(DomainError::Validation(format!(
            "{field} must be at most {max_len} characters"
        )));
    }
    Ok(())
}

impl Product {
    /// Creates an empty product, ready for event replay.
    #[must_use]
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            version: 0,
            created: false,
            sku: String::new(),
            name: String::new(),
            price_cents: 0,
            currency: String::new(),
            discontinued: false,
            log: EventLog::new(),
        }
    }

    /// Creates a product, producing a `ProductCreated` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for an empty or oversized SKU or
    /// name, a non-positive price, or a malformed currency code.
    pub fn create(
        id: Uuid,
        sku: &str,
        name: &str,
        price_cents: i64,
        currency: &str,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<Self, DomainError> {
        validate_text("sku", sku, MAX_SKU_LEN)?;
        validate_text("name", name, MAX_NAME_LEN)?;
        validate_price(price_cents)?;
        validate_currency(currency)?;

        let mut product = Self::new(id);
        product.record(
            ProductEventKind::ProductCreated(ProductCreated {
                product_id: id,
                sku: sku.trim().to_owned(),
                name: name.trim().to_owned(),
                price_cents,
                currency: currency.to_owned(),
            }),
            correlation_id,
            clock,
        );
        Ok(product)
    }

    /// Returns `true` once a creation event has been applied.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.created
    }

    /// Returns `true` if the product was discontinued.
    #[must_use]
    pub fn is_discontinued(&self) -> bool {
        self.discontinued
    }

    /// Current price in minor units.
    #[must_use]
    pub fn price_cents(&self) -> i64 {
        self.price_cents
    }

    /// Reprices the product, producing a `PriceChanged` event. Setting the
    /// current price again records nothing.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for a non-positive price and
    /// `DomainError::InvalidState` if the product is discontinued.
    pub fn change_price(
        &mut self,
        new_price_cents: i64,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        validate_price(new_price_cents)?;
        if self.discontinued {
            return Err(DomainError::InvalidState(format!(
                "product {} is discontinued",
                self.id
            )));
        }
        if new_price_cents == self.price_cents {
            return Ok(());
        }
        self.record(
            ProductEventKind::PriceChanged(PriceChanged {
                product_id: self.id,
                old_price_cents: self.price_cents,
                new_price_cents,
            }),
            correlation_id,
            clock,
        );
        Ok(())
    }

    /// Withdraws the product from sale, producing a `ProductDiscontinued`
    /// event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidState` if the product is already
    /// discontinued.
    pub fn discontinue(
        &mut self,
        reason: Option<String>,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if self.discontinued {
            return Err(DomainError::InvalidState(format!(
                "product {} is already discontinued",
                self.id
            )));
        }
        self.record(
            ProductEventKind::ProductDiscontinued(ProductDiscontinued {
                product_id: self.id,
                reason,
            }),
            correlation_id,
            clock,
        );
        Ok(())
    }

    fn record(&mut self, kind: ProductEventKind, correlation_id: Uuid, clock: &dyn Clock) {
        let event = ProductEvent {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_type: kind.event_type().to_owned(),
                aggregate_id: self.id,
                sequence_number: self.version + 1,
                event_version: 1,
                correlation_id,
                causation_id: correlation_id,
                occurred_at: clock.now(),
            },
            kind,
        };
        self.apply(&event);
        self.log.record(event);
    }
}

impl AggregateRoot for Product {
    type Event = ProductEvent;

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(&mut self, event: &Self::Event) {
        match &event.kind {
            ProductEventKind::ProductCreated(payload) => {
                self.created = true;
                self.sku.clone_from(&payload.sku);
                self.name.clone_from(&payload.name);
                self.price_cents = payload.price_cents;
                self.currency.clone_from(&payload.currency);
            }
            ProductEventKind::PriceChanged(payload) => {
                self.price_cents = payload.new_price_cents;
            }
            ProductEventKind::ProductDiscontinued(_) => {
                self.discontinued = true;
            }
        }
        self.version += 1;
    }

    fn event_log(&self) -> &EventLog<Self::Event> {
        &self.log
    }

    fn event_log_mut(&mut self) -> &mut EventLog<Self::Event> {
        &mut self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::event::DomainEvent;
    use catalog_test_support::FixedClock;

    fn created_product() -> Product {
        Product::create(
            Uuid::new_v4(),
            "SKU-100",
            "Trail Shoe",
            12_999,
            "USD",
            Uuid::new_v4(),
            &FixedClock::standard(),
        )
        .unwrap()
    }

    #[test]
    fn test_create_produces_product_created_event() {
        // Arrange
        let product_id = Uuid::new_v4();
        let correlation_id = Uuid::new_v4();
        let clock = FixedClock::standard();

        // Act
        let product = Product::create(
            product_id,
            "  SKU-1 ",
            "Trail Shoe",
            12_999,
            "USD",
            correlation_id,
            &clock,
        )
        .unwrap();

        // Assert
        let events = product.uncommitted_events();
        assert_eq!(events.len(), 1);

        let event = &events[0];
        assert_eq!(event.event_type(), "product.created");

        let meta = event.metadata();
        assert_eq!(meta.aggregate_id, product_id);
        assert_eq!(meta.sequence_number, 1);
        assert_eq!(meta.correlation_id, correlation_id);
        assert_eq!(meta.occurred_at, clock.0);

        match &event.kind {
            ProductEventKind::ProductCreated(payload) => {
                assert_eq!(payload.sku, "SKU-1");
                assert_eq!(payload.price_cents, 12_999);
            }
            other => panic!("expected ProductCreated, got {other:?}"),
        }
        assert!(product.exists());
        assert_eq!(product.version(), 1);
    }

    #[test]
    fn test_create_rejects_invalid_input() {
        let clock = FixedClock::standard();
        let cases = [
            ("", "Name", 100, "USD"),
            ("SKU", "   ", 100, "USD"),
            ("SKU", "Name", 0, "USD"),
            ("SKU", "Name", -5, "USD"),
            ("SKU", "Name", 100, "usd"),
            ("SKU", "Name", 100, "EURO"),
        ];

        for (sku, name, price, currency) in cases {
            let result =
                Product::create(Uuid::new_v4(), sku, name, price, currency, Uuid::new_v4(), &clock);
            assert!(
                matches!(result, Err(DomainError::Validation(_))),
                "expected validation error for {sku:?}/{name:?}/{price}/{currency:?}"
            );
        }
    }

    #[test]
    fn test_change_price_produces_price_changed_event() {
        // Arrange
        let mut product = created_product();

        // Act
        product
            .change_price(9_999, Uuid::new_v4(), &FixedClock::standard())
            .unwrap();

        // Assert
        let events = product.uncommitted_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].metadata.sequence_number, 2);
        match &events[1].kind {
            ProductEventKind::PriceChanged(payload) => {
                assert_eq!(payload.old_price_cents, 12_999);
                assert_eq!(payload.new_price_cents, 9_999);
            }
            other => panic!("expected PriceChanged, got {other:?}"),
        }
        assert_eq!(product.price_cents(), 9_999);
    }

    #[test]
    fn test_change_price_to_same_value_records_nothing() {
        let mut product = created_product();

        product
            .change_price(12_999, Uuid::new_v4(), &FixedClock::standard())
            .unwrap();

        assert_eq!(product.uncommitted_events().len(), 1);
    }

    #[test]
    fn test_discontinued_product_cannot_be_repriced_or_discontinued_again() {
        // Arrange
        let clock = FixedClock::standard();
        let mut product = created_product();
        product
            .discontinue(Some("supplier recall".into()), Uuid::new_v4(), &clock)
            .unwrap();

        // Act
        let reprice = product.change_price(5_000, Uuid::new_v4(), &clock);
        let again = product.discontinue(None, Uuid::new_v4(), &clock);

        // Assert
        assert!(product.is_discontinued());
        assert!(matches!(reprice, Err(DomainError::InvalidState(_))));
        assert!(matches!(again, Err(DomainError::InvalidState(_))));
        assert_eq!(product.uncommitted_events().len(), 2);
    }
}
