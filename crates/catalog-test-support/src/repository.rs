//! Test repositories: in-memory `EventRepository` and `TransactionManager`
//! implementations for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use catalog_core::error::DomainError;
use catalog_core::repository::{EventRepository, StoredEvent, Transaction, TransactionManager};
use uuid::Uuid;

use crate::journal::Journal;

#[derive(Debug, Default)]
struct StoreState {
    streams: HashMap<Uuid, Vec<StoredEvent>>,
    fail_commits: bool,
    commits: usize,
    rollbacks: usize,
}

/// An event store held in memory. Transactions stage appends and only make
/// them visible on commit. Every `begin`, `append`, `commit` and `rollback`
/// is written to the store's [`Journal`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    state: Arc<Mutex<StoreState>>,
    journal: Journal,
}

impl InMemoryEventStore {
    /// Creates an empty store with its own journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store writing to a shared journal.
    #[must_use]
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            state: Arc::default(),
            journal,
        }
    }

    /// Makes every commit fail with an infrastructure error.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn failing_commits(self) -> Self {
        self.state.lock().unwrap().fail_commits = true;
        self
    }

    /// Seeds an aggregate stream as if it had been committed earlier.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn seed(&self, aggregate_id: Uuid, events: Vec<StoredEvent>) {
        self.state
            .lock()
            .unwrap()
            .streams
            .entry(aggregate_id)
            .or_default()
            .extend(events);
    }

    /// Returns the committed events of an aggregate.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn events(&self, aggregate_id: Uuid) -> Vec<StoredEvent> {
        self.state
            .lock()
            .unwrap()
            .streams
            .get(&aggregate_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of successful commits.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    /// Number of rollbacks.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.state.lock().unwrap().rollbacks
    }

    /// The journal this store writes to.
    #[must_use]
    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }
}

#[async_trait]
impl EventRepository for InMemoryEventStore {
    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(self.events(aggregate_id))
    }
}

#[async_trait]
impl TransactionManager for InMemoryEventStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, DomainError> {
        self.journal.record("begin");
        Ok(Box::new(InMemoryTransaction {
            store: self.clone(),
            staged: Vec::new(),
        }))
    }
}

struct InMemoryTransaction {
    store: InMemoryEventStore,
    staged: Vec<StoredEvent>,
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn append_events(
        &mut self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: &[StoredEvent],
    ) -> Result<(), DomainError> {
        let committed = self
            .store
            .events(aggregate_id)
            .last()
            .map_or(0, |e| e.sequence_number);
        let actual = self
            .staged
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.sequence_number)
            .max()
            .unwrap_or(committed);
        if actual != expected_version {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }
        self.store.journal.record(format!("append {aggregate_id}"));
        self.staged.extend_from_slice(events);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        let InMemoryTransaction { store, staged } = *self;
        let mut state = store.state.lock().unwrap();
        if state.fail_commits {
            store.journal.record("commit failed");
            return Err(DomainError::Infrastructure("commit rejected".into()));
        }
        for event in staged {
            state
                .streams
                .entry(event.aggregate_id)
                .or_default()
                .push(event);
        }
        state.commits += 1;
        store.journal.record("commit");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DomainError> {
        self.store.state.lock().unwrap().rollbacks += 1;
        self.store.journal.record("rollback");
        Ok(())
    }
}

/// An event repository that always returns an empty event list. Useful for
/// testing "aggregate not found" scenarios.
#[derive(Debug)]
pub struct EmptyEventRepository;

#[async_trait]
impl EventRepository for EmptyEventRepository {
    async fn load_events(&self, _aggregate_id: Uuid) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(vec![])
    }
}

/// An event repository that always returns an infrastructure error. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventRepository;

#[async_trait]
impl EventRepository for FailingEventRepository {
    async fn load_events(&self, _aggregate_id: Uuid) -> Result<Vec<StoredEvent>, DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }
}

/// A transaction manager whose `begin` always fails.
#[derive(Debug)]
pub struct FailingTransactionManager;

#[async_trait]
impl TransactionManager for FailingTransactionManager {
    async fn begin(&self) -> Result<Box<dyn Transaction>, DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }
}
