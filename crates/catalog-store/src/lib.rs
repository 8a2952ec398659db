//! Catalog CDC service: PostgreSQL event store.
//!
//! Implements the read-side [`catalog_core::repository::EventRepository`] and
//! the transactional write side used by the unit of work.

pub mod pg_event_repository;
pub mod schema;
