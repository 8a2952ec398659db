//! Catalog Core: shared domain abstractions.
//!
//! This crate defines the aggregate, event, error and persistence traits
//! that the write side (unit of work) and the bounded contexts depend on.
//! It contains no infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod command;
pub mod error;
pub mod event;
pub mod repository;
