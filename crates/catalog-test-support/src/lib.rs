//! Shared test mocks and utilities for the catalog CDC service.

mod clock;
mod journal;
mod repository;

pub use clock::FixedClock;
pub use journal::Journal;
pub use repository::{
    EmptyEventRepository, FailingEventRepository, FailingTransactionManager, InMemoryEventStore,
};
