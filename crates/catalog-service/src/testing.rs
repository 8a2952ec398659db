//! In-memory application state for route tests.

use std::sync::Arc;

use catalog_messaging::memory::InMemoryLog;
use catalog_product::application::search_projection::InMemoryProductSearchIndex;
use catalog_test_support::{
    EmptyEventRepository, FailingTransactionManager, FixedClock, InMemoryEventStore,
};
use catalog_unit_of_work::event_bus::DomainEventBus;
use catalog_unit_of_work::publisher::TransportIntegrationPublisher;
use catalog_unit_of_work::unit_of_work::UnitOfWork;

use crate::config::DEFAULT_PRODUCT_TOPIC;
use crate::state::AppState;

pub(crate) struct TestHarness {
    pub(crate) state: AppState,
    pub(crate) store: InMemoryEventStore,
    pub(crate) log: InMemoryLog,
    pub(crate) index: InMemoryProductSearchIndex,
}

impl TestHarness {
    pub(crate) fn new() -> Self {
        let store = InMemoryEventStore::new();
        let log = InMemoryLog::new();
        let index = InMemoryProductSearchIndex::new();
        let unit_of_work = UnitOfWork::new(
            Arc::new(store.clone()),
            Arc::new(DomainEventBus::empty()),
            Arc::new(TransportIntegrationPublisher::new(
                Arc::new(log.clone()),
                DEFAULT_PRODUCT_TOPIC,
            )),
        );
        let state = AppState::new(
            Arc::new(FixedClock::standard()),
            Arc::new(store.clone()),
            unit_of_work,
            Arc::new(index.clone()),
        );
        Self {
            state,
            store,
            log,
            index,
        }
    }
}

/// State whose transactions never start.
pub(crate) fn failing_harness() -> AppState {
    let unit_of_work = UnitOfWork::new(
        Arc::new(FailingTransactionManager),
        Arc::new(DomainEventBus::empty()),
        Arc::new(TransportIntegrationPublisher::new(
            Arc::new(InMemoryLog::new()),
            DEFAULT_PRODUCT_TOPIC,
        )),
    );
    AppState::new(
        Arc::new(FixedClock::standard()),
        Arc::new(EmptyEventRepository),
        unit_of_work,
        Arc::new(InMemoryProductSearchIndex::new()),
    )
}
