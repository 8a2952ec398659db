//! Catalog service: HTTP API and consumer runtime wiring.

pub mod app;
pub mod config;
pub mod consumer;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;

#[cfg(test)]
mod testing;
