//! Shared application state.

use std::sync::Arc;

use catalog_core::clock::Clock;
use catalog_core::repository::EventRepository;
use catalog_product::application::search_projection::ProductSearchIndex;
use catalog_unit_of_work::unit_of_work::UnitOfWork;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Clock stamped on new events.
    pub clock: Arc<dyn Clock>,
    /// Read access to product event streams.
    pub event_repository: Arc<dyn EventRepository>,
    /// Write side: every command runs inside a unit of work from here.
    pub unit_of_work: UnitOfWork,
    /// Read model maintained by the search projection.
    pub search_index: Arc<dyn ProductSearchIndex>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        event_repository: Arc<dyn EventRepository>,
        unit_of_work: UnitOfWork,
        search_index: Arc<dyn ProductSearchIndex>,
    ) -> Self {
        Self {
            clock,
            event_repository,
            unit_of_work,
            search_index,
        }
    }
}
