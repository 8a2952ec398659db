//! Transaction scope that orders event dispatch around the commit.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use catalog_core::aggregate::SharedAggregate;
use catalog_core::error::DomainError;
use catalog_core::repository::{StoredEvent, Transaction, TransactionManager};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::event_bus::DomainEventBus;
use crate::publisher::IntegrationEventPublisher;

/// Opens unit-of-work scopes against one persistence backend, one domain
/// event bus and one outbound publisher.
#[derive(Clone)]
pub struct UnitOfWork {
    transactions: Arc<dyn TransactionManager>,
    bus: Arc<DomainEventBus>,
    publisher: Arc<dyn IntegrationEventPublisher>,
}

impl UnitOfWork {
    /// Creates a unit of work factory.
    #[must_use]
    pub fn new(
        transactions: Arc<dyn TransactionManager>,
        bus: Arc<DomainEventBus>,
        publisher: Arc<dyn IntegrationEventPublisher>,
    ) -> Self {
        Self {
            transactions,
            bus,
            publisher,
        }
    }

    /// Opens a scope and begins its transaction.
    ///
    /// # Errors
    ///
    /// Returns the transaction manager's error if the transaction cannot be
    /// started.
    pub async fn start(&self) -> Result<UnitOfWorkScope, DomainError> {
        let transaction = self.transactions.begin().await?;
        Ok(UnitOfWorkScope {
            state: Arc::new(Mutex::new(ScopeState {
                transaction: Some(transaction),
                aggregates: Vec::new(),
                registered: HashSet::new(),
                closed: false,
            })),
            bus: Arc::clone(&self.bus),
            publisher: Arc::clone(&self.publisher),
        })
    }

    /// Runs `callback` inside a fresh scope: `start`, the callback, `finish`.
    /// A callback or finish error goes through `fail` before it is returned.
    ///
    /// # Errors
    ///
    /// Returns the callback's error, or the first error raised while
    /// finishing the scope.
    pub async fn run<T, F, Fut>(&self, callback: F) -> Result<T, DomainError>
    where
        F: FnOnce(UnitOfWorkScope) -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        let scope = self.start().await?;
        match callback(scope.clone()).await {
            Ok(value) => {
                if scope.is_closed().await {
                    return Ok(value);
                }
                match scope.finish().await {
                    Ok(()) => Ok(value),
                    Err(err) => {
                        if !scope.is_closed().await {
                            scope.fail_quietly().await;
                        }
                        Err(err)
                    }
                }
            }
            Err(err) => {
                if !scope.is_closed().await {
                    scope.fail_quietly().await;
                }
                Err(err)
            }
        }
    }
}

struct ScopeState {
    transaction: Option<Box<dyn Transaction>>,
    aggregates: Vec<SharedAggregate>,
    registered: HashSet<Uuid>,
    closed: bool,
}

/// An open unit of work. Clones share the same scope.
#[derive(Clone)]
pub struct UnitOfWorkScope {
    state: Arc<Mutex<ScopeState>>,
    bus: Arc<DomainEventBus>,
    publisher: Arc<dyn IntegrationEventPublisher>,
}

fn already_closed() -> DomainError {
    DomainError::InvalidState("unit of work is already closed".into())
}

impl UnitOfWorkScope {
    /// Registers an aggregate. Registering the same aggregate id again is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidState`] if the scope is closed.
    pub async fn add_aggregate_root(&self, aggregate: SharedAggregate) -> Result<(), DomainError> {
        let aggregate_id = aggregate.lock().await.aggregate_id();
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(already_closed());
        }
        if state.registered.insert(aggregate_id) {
            state.aggregates.push(aggregate);
            debug!(aggregate_id = %aggregate_id, "aggregate registered");
        }
        Ok(())
    }

    /// Number of registered aggregates.
    pub async fn len(&self) -> usize {
        self.state.lock().await.aggregates.len()
    }

    /// Returns `true` if no aggregate is registered.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns `true` once the scope finished or failed.
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Closes the scope successfully: dispatches domain events, persists and
    /// commits, then publishes integration events and clears every event
    /// buffer.
    ///
    /// A domain handler, persistence or commit error leaves the scope open so
    /// `fail` can roll back. Once the commit succeeded the scope is closed
    /// even if publication fails.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidState`] if the scope is already closed,
    /// the first domain handler or persistence error, or
    /// [`DomainError::Infrastructure`] if any integration event could not be
    /// published.
    pub async fn finish(&self) -> Result<(), DomainError> {
        if self.is_closed().await {
            return Err(already_closed());
        }

        self.dispatch_domain_events().await?;

        let aggregates = self.snapshot().await;
        let Some(mut transaction) = self.state.lock().await.transaction.take() else {
            return Err(already_closed());
        };
        if let Err(err) = persist(transaction.as_mut(), &aggregates).await {
            self.state.lock().await.transaction = Some(transaction);
            return Err(err);
        }
        transaction.commit().await?;
        self.state.lock().await.closed = true;
        info!(aggregates = aggregates.len(), "unit of work committed");

        let mut integration_events = Vec::new();
        for aggregate in &aggregates {
            integration_events.extend(aggregate.lock().await.integration_events());
        }
        let total = integration_events.len();
        let mut failed = 0_usize;
        for event in &integration_events {
            if let Err(err) = self.publisher.publish(event).await {
                failed += 1;
                error!(
                    event_name = %event.event_name,
                    aggregate_id = %event.aggregate_id,
                    error = %err,
                    "integration event publication failed after commit"
                );
            }
        }

        for aggregate in &aggregates {
            aggregate.lock().await.clear_events();
        }

        if failed > 0 {
            return Err(DomainError::Infrastructure(format!(
                "{failed} of {total} integration events could not be published"
            )));
        }
        Ok(())
    }

    /// Closes the scope unsuccessfully: rolls back the transaction if it is
    /// still open and discards every registered aggregate's events.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidState`] if the scope is already closed,
    /// or the rollback error.
    pub async fn fail(&self) -> Result<(), DomainError> {
        let (transaction, aggregates) = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(already_closed());
            }
            state.closed = true;
            (state.transaction.take(), state.aggregates.clone())
        };
        for aggregate in &aggregates {
            aggregate.lock().await.clear_events();
        }
        if let Some(transaction) = transaction {
            transaction.rollback().await?;
        }
        warn!(aggregates = aggregates.len(), "unit of work rolled back");
        Ok(())
    }

    async fn fail_quietly(&self) {
        if let Err(err) = self.fail().await {
            error!(error = %err, "unit of work rollback failed");
        }
    }

    async fn snapshot(&self) -> Vec<SharedAggregate> {
        self.state.lock().await.aggregates.clone()
    }

    /// Dispatches until a full pass over the registered aggregates finds no
    /// undispatched event, so events raised by handlers are delivered too.
    async fn dispatch_domain_events(&self) -> Result<(), DomainError> {
        loop {
            let mut dispatched = 0_usize;
            for aggregate in self.snapshot().await {
                while let Some(event) = next_undispatched(&aggregate).await {
                    self.bus.publish(&event).await?;
                    aggregate.lock().await.mark_dispatched(1);
                    dispatched += 1;
                }
            }
            if dispatched == 0 {
                return Ok(());
            }
        }
    }
}

async fn next_undispatched(aggregate: &SharedAggregate) -> Option<StoredEvent> {
    aggregate
        .lock()
        .await
        .undispatched_events()
        .into_iter()
        .next()
}

async fn persist(
    transaction: &mut dyn Transaction,
    aggregates: &[SharedAggregate],
) -> Result<(), DomainError> {
    for aggregate in aggregates {
        let (aggregate_id, expected_version, events) = {
            let guard = aggregate.lock().await;
            (
                guard.aggregate_id(),
                guard.expected_version(),
                guard.pending_events(),
            )
        };
        if events.is_empty() {
            continue;
        }
        transaction
            .append_events(aggregate_id, expected_version, &events)
            .await?;
    }
    Ok(())
}
