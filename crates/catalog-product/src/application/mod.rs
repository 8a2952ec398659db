//! Application layer for the Product context.

pub mod audit_trail;
pub mod command_handlers;
pub mod query_handlers;
pub mod search_projection;
