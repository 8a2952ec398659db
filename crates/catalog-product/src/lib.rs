//! Catalog CDC service: Product bounded context.
//!
//! Owns the product lifecycle (creation, repricing, discontinuation) on the
//! write side and the search projection fed by product integration events on
//! the read side.

pub mod application;
pub mod domain;
