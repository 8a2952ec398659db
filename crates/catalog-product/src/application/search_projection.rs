//! Search projection fed by product integration events.
//!
//! The projection is a consumer-side [`MessageHandler`]: it parses each
//! integration event and folds it into a [`ProductSearchIndex`]. Malformed
//! input can never succeed and is reported as `Validation`; index failures
//! are transient and reported as `Infrastructure` so the runtime retries.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use catalog_core::event::IntegrationEvent;
use catalog_messaging::handler::{HandlerError, MessageHandler};
use catalog_messaging::message::MessageContext;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::domain::events::{
    INTEGRATION_EVENT_VERSION, PRODUCT_CREATED, PRODUCT_DISCONTINUED, PRODUCT_PRICE_CHANGED,
    PriceChanged, ProductCreated, ProductDiscontinued,
};

/// Errors raised by a search index backend.
#[derive(Debug, Error)]
pub enum SearchIndexError {
    /// The backend could not be reached.
    #[error("search index unavailable: {0}")]
    Unavailable(String),
}

/// A product as seen by search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDocument {
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
}

/// Storage behind the search projection.
#[async_trait]
pub trait ProductSearchIndex: Send + Sync {
    /// Inserts or replaces a document.
    async fn upsert(&self, document: ProductDocument) -> Result<(), SearchIndexError>;

    /// Fetches a document by product id.
    async fn get(&self, product_id: Uuid) -> Result<Option<ProductDocument>, SearchIndexError>;

    /// Active products whose name or SKU contains `query`, ignoring case.
    /// An empty query matches every active product.
    async fn search(&self, query: &str) -> Result<Vec<ProductDocument>, SearchIndexError>;
}

/// A [`ProductSearchIndex`] held in memory, ordered by name.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProductSearchIndex {
    documents: Arc<Mutex<BTreeMap<Uuid, ProductDocument>>>,
    unavailable: Arc<Mutex<bool>>,
}

impl InMemoryProductSearchIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self
            .unavailable
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = unavailable;
    }

    /// Number of indexed documents, discontinued ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), SearchIndexError> {
        if *self
            .unavailable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
        {
            return Err(SearchIndexError::Unavailable("index offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProductSearchIndex for InMemoryProductSearchIndex {
    async fn upsert(&self, document: ProductDocument) -> Result<(), SearchIndexError> {
        self.check_available()?;
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document.product_id, document);
        Ok(())
    }

    async fn get(&self, product_id: Uuid) -> Result<Option<ProductDocument>, SearchIndexError> {
        self.check_available()?;
        Ok(self
            .documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&product_id)
            .cloned())
    }

    async fn search(&self, query: &str) -> Result<Vec<ProductDocument>, SearchIndexError> {
        self.check_available()?;
        let needle = query.trim().to_lowercase();
        let mut hits: Vec<ProductDocument> = self
            .documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|doc| !doc.discontinued)
            .filter(|doc| {
                needle.is_empty()
                    || doc.name.to_lowercase().contains(&needle)
                    || doc.sku.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.sku.cmp(&b.sku)));
        Ok(hits)
    }
}

/// Consumer handler that keeps a [`ProductSearchIndex`] in step with product
/// integration events.
pub struct ProductSearchProjection {
    index: Arc<dyn ProductSearchIndex>,
}

fn index_error(err: SearchIndexError) -> HandlerError {
    HandlerError::infrastructure(err.to_string())
}

fn body<T: for<'de> Deserialize<'de>>(event: &IntegrationEvent) -> Result<T, HandlerError> {
    serde_json::from_value(event.payload.clone()).map_err(|e| {
        HandlerError::validation(format!("malformed {} payload: {e}", event.event_name))
    })
}

impl ProductSearchProjection {
    /// Creates a projection writing to `index`.
    #[must_use]
    pub fn new(index: Arc<dyn ProductSearchIndex>) -> Self {
        Self { index }
    }

    async fn existing(&self, product_id: Uuid) -> Result<ProductDocument, HandlerError> {
        self.index
            .get(product_id)
            .await
            .map_err(index_error)?
            .ok_or_else(|| {
                HandlerError::unprocessable(format!("product {product_id} is not indexed"))
            })
    }

    async fn apply(&self, event: &IntegrationEvent) -> Result<(), HandlerError> {
        match event.event_name.as_str() {
            PRODUCT_CREATED => {
                let created: ProductCreated = body(event)?;
                self.index
                    .upsert(ProductDocument {
                        product_id: created.product_id,
                        sku: created.sku,
                        name: created.name,
                        price_cents: created.price_cents,
                        currency: created.currency,
                        discontinued: false,
                    })
                    .await
                    .map_err(index_error)
            }
            PRODUCT_PRICE_CHANGED => {
                let changed: PriceChanged = body(event)?;
                let mut document = self.existing(changed.product_id).await?;
                document.price_cents = changed.new_price_cents;
                self.index.upsert(document).await.map_err(index_error)
            }
            PRODUCT_DISCONTINUED => {
                let discontinued: ProductDiscontinued = body(event)?;
                let mut document = self.existing(discontinued.product_id).await?;
                document.discontinued = true;
                self.index.upsert(document).await.map_err(index_error)
            }
            other => {
                debug!(event_name = other, "event ignored by search projection");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl MessageHandler for ProductSearchProjection {
    async fn handle(&self, payload: &[u8], ctx: &MessageContext) -> Result<(), HandlerError> {
        let event = IntegrationEvent::from_bytes(payload)
            .map_err(|e| HandlerError::validation(format!("malformed integration event: {e}")))?;
        if event.event_version > INTEGRATION_EVENT_VERSION {
            return Err(HandlerError::unprocessable(format!(
                "unsupported {} version {}",
                event.event_name, event.event_version
            )));
        }
        if event.payload == Value::Null {
            return Err(HandlerError::validation("integration event without payload"));
        }
        self.apply(&event).await?;
        debug!(
            topic = ctx.topic(),
            offset = ctx.offset(),
            attempt = ctx.attempt(),
            event_name = %event.event_name,
            aggregate_id = %event.aggregate_id,
            "search projection updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_messaging::handler::ErrorKind;
    use catalog_messaging::message::InboundMessage;
    use catalog_test_support::FixedClock;

    fn context() -> MessageContext {
        MessageContext::primary(&InboundMessage {
            topic: "catalog.products".into(),
            partition: 0,
            offset: 7,
            key: None,
            value: Vec::new(),
            headers: Default::default(),
        })
    }

    fn encoded(event_name: &str, product_id: Uuid, payload: Value) -> Vec<u8> {
        IntegrationEvent {
            event_name: event_name.into(),
            aggregate_id: product_id,
            payload,
            occurred_on: FixedClock::standard().0,
            event_version: 1,
        }
        .to_bytes()
        .unwrap()
    }

    fn created(product_id: Uuid, sku: &str, name: &str) -> Vec<u8> {
        encoded(
            PRODUCT_CREATED,
            product_id,
            serde_json::json!({
                "product_id": product_id,
                "sku": sku,
                "name": name,
                "price_cents": 12_999,
                "currency": "USD",
            }),
        )
    }

    fn projection() -> (ProductSearchProjection, InMemoryProductSearchIndex) {
        let index = InMemoryProductSearchIndex::new();
        (ProductSearchProjection::new(Arc::new(index.clone())), index)
    }

    #[tokio::test]
    async fn test_lifecycle_events_update_the_index() {
        // Arrange
        let (projection, index) = projection();
        let product_id = Uuid::new_v4();
        let ctx = context();

        // Act
        projection
            .handle(&created(product_id, "SKU-100", "Trail Shoe"), &ctx)
            .await
            .unwrap();
        projection
            .handle(
                &encoded(
                    PRODUCT_PRICE_CHANGED,
                    product_id,
                    serde_json::json!({
                        "product_id": product_id,
                        "old_price_cents": 12_999,
                        "new_price_cents": 9_999,
                    }),
                ),
                &ctx,
            )
            .await
            .unwrap();

        // Assert
        let document = index.get(product_id).await.unwrap().unwrap();
        assert_eq!(document.price_cents, 9_999);
        assert_eq!(index.search("trail").await.unwrap(), vec![document]);
    }

    #[tokio::test]
    async fn test_discontinued_products_drop_out_of_search() {
        let (projection, index) = projection();
        let product_id = Uuid::new_v4();
        let ctx = context();
        projection
            .handle(&created(product_id, "SKU-100", "Trail Shoe"), &ctx)
            .await
            .unwrap();

        projection
            .handle(
                &encoded(
                    PRODUCT_DISCONTINUED,
                    product_id,
                    serde_json::json!({ "product_id": product_id, "reason": null }),
                ),
                &ctx,
            )
            .await
            .unwrap();

        assert!(index.search("").await.unwrap().is_empty());
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_search_matches_sku_and_orders_by_name() {
        let (projection, index) = projection();
        let ctx = context();
        for (sku, name) in [("BAG-2", "Rucksack"), ("SHOE-1", "Approach Shoe"), ("BAG-1", "Daypack")] {
            projection
                .handle(&created(Uuid::new_v4(), sku, name), &ctx)
                .await
                .unwrap();
        }

        let names: Vec<String> = index
            .search("bag")
            .await
            .unwrap()
            .into_iter()
            .map(|doc| doc.name)
            .collect();

        assert_eq!(names, vec!["Daypack", "Rucksack"]);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_validation_error() {
        let (projection, _) = projection();

        let garbage = projection.handle(b"not json", &context()).await;
        let wrong_shape = projection
            .handle(
                &encoded(PRODUCT_CREATED, Uuid::new_v4(), serde_json::json!({ "sku": 1 })),
                &context(),
            )
            .await;

        assert_eq!(garbage.unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(wrong_shape.unwrap_err().kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_update_for_unknown_product_is_unprocessable() {
        let (projection, _) = projection();
        let product_id = Uuid::new_v4();

        let result = projection
            .handle(
                &encoded(
                    PRODUCT_DISCONTINUED,
                    product_id,
                    serde_json::json!({ "product_id": product_id, "reason": null }),
                ),
                &context(),
            )
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Unprocessable);
    }

    #[tokio::test]
    async fn test_index_outage_is_infrastructure_error() {
        // Arrange
        let (projection, index) = projection();
        index.set_unavailable(true);

        // Act
        let result = projection
            .handle(&created(Uuid::new_v4(), "SKU-1", "Tent"), &context())
            .await;

        // Assert
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Infrastructure);
    }

    #[tokio::test]
    async fn test_unknown_events_are_ignored() {
        let (projection, index) = projection();

        let result = projection
            .handle(
                &encoded("catalog.category.created", Uuid::new_v4(), serde_json::json!({})),
                &context(),
            )
            .await;

        assert!(result.is_ok());
        assert!(index.is_empty());
    }
}
