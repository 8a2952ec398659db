//! Write side to read side: commands publish integration events that the
//! consumer runtime folds into the search index.

use std::sync::Arc;
use std::time::Duration;

use catalog_core::clock::SystemClock;
use catalog_messaging::config::ConsumerConfig;
use catalog_messaging::memory::InMemoryLog;
use catalog_messaging::registry::HandlerRegistry;
use catalog_messaging::runtime::ConsumerRuntime;
use catalog_product::application::command_handlers::{
    handle_change_price, handle_create_product, handle_discontinue_product,
};
use catalog_product::application::search_projection::{
    InMemoryProductSearchIndex, ProductSearchIndex, ProductSearchProjection,
};
use catalog_product::domain::commands::{ChangePrice, CreateProduct, DiscontinueProduct};
use catalog_test_support::{FixedClock, InMemoryEventStore};
use catalog_unit_of_work::event_bus::DomainEventBus;
use catalog_unit_of_work::publisher::TransportIntegrationPublisher;
use catalog_unit_of_work::unit_of_work::UnitOfWork;
use tokio::sync::watch;
use uuid::Uuid;

const PRODUCTS_TOPIC: &str = "catalog.products";

async fn eventually<F, Fut>(what: &str, condition: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_product_lifecycle_reaches_search_index() {
    // Arrange
    let log = InMemoryLog::new();
    let store = InMemoryEventStore::new();
    let publisher = TransportIntegrationPublisher::new(Arc::new(log.clone()), PRODUCTS_TOPIC);
    let uow = UnitOfWork::new(
        Arc::new(store.clone()),
        Arc::new(DomainEventBus::empty()),
        Arc::new(publisher),
    );
    let index = InMemoryProductSearchIndex::new();
    let registry = HandlerRegistry::builder()
        .route(
            PRODUCTS_TOPIC,
            Arc::new(ProductSearchProjection::new(Arc::new(index.clone()))),
        )
        .build()
        .unwrap();
    let config = ConsumerConfig {
        retry_delays_ms: vec![0],
        poll_interval_ms: 1,
        ..ConsumerConfig::default()
    };
    let runtime = ConsumerRuntime::from_config(
        &config,
        Arc::new(log.clone()),
        registry,
        None,
        Arc::new(SystemClock),
    )
    .unwrap();
    let (stop, shutdown) = watch::channel(false);
    let consumer = tokio::spawn(runtime.run(shutdown));

    let clock = FixedClock::standard();
    let kept = Uuid::new_v4();
    let dropped = Uuid::new_v4();

    // Act
    for (product_id, sku, name) in [(kept, "TENT-2", "Two Person Tent"), (dropped, "TENT-1", "Solo Tent")] {
        handle_create_product(
            &CreateProduct {
                correlation_id: Uuid::new_v4(),
                product_id,
                sku: sku.into(),
                name: name.into(),
                price_cents: 24_900,
                currency: "EUR".into(),
            },
            &clock,
            &store,
            &uow,
        )
        .await
        .unwrap();
    }
    handle_change_price(
        &ChangePrice {
            correlation_id: Uuid::new_v4(),
            product_id: kept,
            new_price_cents: 19_900,
        },
        &clock,
        &store,
        &uow,
    )
    .await
    .unwrap();
    handle_discontinue_product(
        &DiscontinueProduct {
            correlation_id: Uuid::new_v4(),
            product_id: dropped,
            reason: None,
        },
        &clock,
        &store,
        &uow,
    )
    .await
    .unwrap();

    // Assert
    eventually("search index to converge", || {
        let index = index.clone();
        async move {
            let hits = index.search("tent").await.unwrap();
            hits.len() == 1 && hits[0].product_id == kept && hits[0].price_cents == 19_900
        }
    })
    .await;
    assert_eq!(index.len(), 2);
    assert!(log.topic_messages("catalog.products.retry-1").is_empty());
    assert!(log.topic_messages("catalog.products.dlq").is_empty());

    stop.send(true).unwrap();
    consumer.await.unwrap().unwrap();
    assert!(!log.is_connected());
}
