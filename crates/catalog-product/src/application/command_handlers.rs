//! Command handlers for the Product context.
//!
//! Each handler runs inside a unit of work: load the aggregate, execute the
//! command, register the aggregate. The unit of work then dispatches domain
//! events, persists and commits, and publishes integration events.

use catalog_core::aggregate::{AggregateRoot, TrackedAggregate, shared};
use catalog_core::clock::Clock;
use catalog_core::error::DomainError;
use catalog_core::event::EventMetadata;
use catalog_core::repository::{EventRepository, StoredEvent};
use catalog_unit_of_work::unit_of_work::UnitOfWork;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::aggregates::Product;
use crate::domain::commands::{ChangePrice, CreateProduct, DiscontinueProduct};
use crate::domain::events::{ProductEvent, ProductEventKind};

/// Reconstitutes a `Product` from stored events.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if event deserialization fails.
pub(crate) fn reconstitute(
    product_id: Uuid,
    existing_events: &[StoredEvent],
) -> Result<Product, DomainError> {
    let mut product = Product::new(product_id);
    for stored in existing_events {
        let kind: ProductEventKind =
            serde_json::from_value(stored.payload.clone()).map_err(|e| {
                DomainError::Infrastructure(format!("event deserialization failed: {e}"))
            })?;
        let event = ProductEvent {
            metadata: EventMetadata {
                event_id: stored.event_id,
                event_type: stored.event_type.clone(),
                aggregate_id: stored.aggregate_id,
                sequence_number: stored.sequence_number,
                event_version: stored.event_version,
                correlation_id: stored.correlation_id,
                causation_id: stored.causation_id,
                occurred_at: stored.occurred_at,
            },
            kind,
        };
        product.apply(&event);
    }
    Ok(product)
}

async fn load_existing(
    product_id: Uuid,
    repo: &dyn EventRepository,
) -> Result<Product, DomainError> {
    let stored_events = repo.load_events(product_id).await?;
    if stored_events.is_empty() {
        return Err(DomainError::AggregateNotFound(product_id));
    }
    reconstitute(product_id, &stored_events)
}

/// Handles the `CreateProduct` command.
///
/// # Errors
///
/// Returns `DomainError::Validation` for invalid input,
/// `DomainError::InvalidState` if the product already exists, or any error
/// raised while the unit of work persists and publishes.
#[instrument(skip(command, clock, repo, uow), fields(product_id = %command.product_id))]
pub async fn handle_create_product(
    command: &CreateProduct,
    clock: &dyn Clock,
    repo: &dyn EventRepository,
    uow: &UnitOfWork,
) -> Result<Vec<StoredEvent>, DomainError> {
    let stored_events = uow
        .run(|scope| async move {
            if !repo.load_events(command.product_id).await?.is_empty() {
                return Err(DomainError::InvalidState(format!(
                    "product {} already exists",
                    command.product_id
                )));
            }
            let product = shared(Product::create(
                command.product_id,
                &command.sku,
                &command.name,
                command.price_cents,
                &command.currency,
                command.correlation_id,
                clock,
            )?);
            scope.add_aggregate_root(product.clone()).await?;
            let pending = product.lock().await.pending_events();
            Ok::<_, DomainError>(pending)
        })
        .await?;
    info!(sku = %command.sku, "product created");
    Ok(stored_events)
}

/// Handles the `ChangePrice` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` for an unknown product,
/// `DomainError::Validation` or `DomainError::InvalidState` when the domain
/// rejects the change, or any error raised while the unit of work persists
/// and publishes.
#[instrument(skip(command, clock, repo, uow), fields(product_id = %command.product_id))]
pub async fn handle_change_price(
    command: &ChangePrice,
    clock: &dyn Clock,
    repo: &dyn EventRepository,
    uow: &UnitOfWork,
) -> Result<Vec<StoredEvent>, DomainError> {
    uow.run(|scope| async move {
        let product = shared(load_existing(command.product_id, repo).await?);
        scope.add_aggregate_root(product.clone()).await?;
        let mut guard = product.lock().await;
        guard.change_price(command.new_price_cents, command.correlation_id, clock)?;
        Ok::<_, DomainError>(guard.pending_events())
    })
    .await
}

/// Handles the `DiscontinueProduct` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` for an unknown product,
/// `DomainError::InvalidState` if it is already discontinued, or any error
/// raised while the unit of work persists and publishes.
#[instrument(skip(command, clock, repo, uow), fields(product_id = %command.product_id))]
pub async fn handle_discontinue_product(
    command: &DiscontinueProduct,
    clock: &dyn Clock,
    repo: &dyn EventRepository,
    uow: &UnitOfWork,
) -> Result<Vec<StoredEvent>, DomainError> {
    uow.run(|scope| async move {
        let product = shared(load_existing(command.product_id, repo).await?);
        scope.add_aggregate_root(product.clone()).await?;
        let mut guard = product.lock().await;
        guard.discontinue(command.reason.clone(), command.correlation_id, clock)?;
        Ok::<_, DomainError>(guard.pending_events())
    })
    .await
}
