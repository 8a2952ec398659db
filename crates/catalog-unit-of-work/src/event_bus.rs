//! In-process domain event bus.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use catalog_core::error::DomainError;
use catalog_core::repository::StoredEvent;
use tracing::debug;

/// Reacts to a domain event inside the unit of work that raised it, before
/// the transaction commits. An error aborts the unit of work.
#[async_trait]
pub trait DomainEventHandler: Send + Sync {
    /// Handles one event.
    async fn handle(&self, event: &StoredEvent) -> Result<(), DomainError>;
}

/// Frozen `event type → handlers` table. Handlers for a type run in the
/// order they were subscribed.
#[derive(Clone, Default)]
pub struct DomainEventBus {
    handlers: HashMap<String, Vec<Arc<dyn DomainEventHandler>>>,
}

impl DomainEventBus {
    /// Starts building a bus.
    #[must_use]
    pub fn builder() -> DomainEventBusBuilder {
        DomainEventBusBuilder::default()
    }

    /// A bus without handlers.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Delivers `event` to every handler of its type, one after another.
    ///
    /// # Errors
    ///
    /// Returns the first handler error; later handlers are not called.
    pub async fn publish(&self, event: &StoredEvent) -> Result<(), DomainError> {
        let Some(handlers) = self.handlers.get(&event.event_type) else {
            return Ok(());
        };
        for handler in handlers {
            handler.handle(event).await?;
        }
        debug!(
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            handlers = handlers.len(),
            "domain event dispatched"
        );
        Ok(())
    }

    /// Number of handlers subscribed to `event_type`.
    #[must_use]
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.get(event_type).map_or(0, Vec::len)
    }
}

impl fmt::Debug for DomainEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self
            .handlers
            .iter()
            .map(|(event_type, handlers)| (event_type.as_str(), handlers.len()))
            .collect();
        types.sort_unstable();
        f.debug_struct("DomainEventBus")
            .field("handlers", &types)
            .finish()
    }
}

/// Builder for [`DomainEventBus`].
#[derive(Default)]
pub struct DomainEventBusBuilder {
    handlers: HashMap<String, Vec<Arc<dyn DomainEventHandler>>>,
}

impl DomainEventBusBuilder {
    /// Subscribes `handler` to events of `event_type`.
    #[must_use]
    pub fn subscribe(mut self, event_type: &str, handler: Arc<dyn DomainEventHandler>) -> Self {
        self.handlers
            .entry(event_type.to_owned())
            .or_default()
            .push(handler);
        self
    }

    /// Freezes the table.
    #[must_use]
    pub fn build(self) -> DomainEventBus {
        DomainEventBus {
            handlers: self.handlers,
        }
    }
}
