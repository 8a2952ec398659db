//! Catalog Unit of Work: the write side of the consistency core.
//!
//! A [`unit_of_work::UnitOfWork`] scopes one business operation: aggregates
//! registered with it have their domain events dispatched in-process, their
//! events persisted and committed in a single transaction, and only then
//! their integration events handed to the outbound publisher.

pub mod event_bus;
pub mod publisher;
pub mod unit_of_work;
