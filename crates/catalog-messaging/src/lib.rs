//! Catalog Messaging: the read side of the consistency core.
//!
//! Polls a partitioned log through a [`transport::Transport`], dispatches each
//! message to the handler registered for its topic, classifies failures and
//! routes them through one of two retry strategies:
//!
//! - **Topic-Chain**: failed messages hop along `retry-1 … retry-N` topics and
//!   finally land on a dead-letter topic.
//! - **Cache-Counted**: failed messages are redelivered in place while a shared
//!   counter in a [`retry_cache::RetryCache`] tracks attempts.
//!
//! [`memory::InMemoryLog`] backs local mode and tests;
//! [`kafka::KafkaTransport`] talks to a real cluster.
//!
//! Each partition is processed by its own sequential worker, so commit order
//! always follows poll order within a partition.

pub mod classifier;
pub mod config;
pub mod error;
pub mod handler;
pub mod kafka;
pub mod memory;
pub mod message;
pub mod registry;
pub mod retry;
pub mod retry_cache;
pub mod runtime;
pub mod transport;
