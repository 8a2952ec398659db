//! Partitioned log transport abstraction.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::message::{InboundMessage, OutboundMessage};

/// Client for a partitioned, offset-addressed log.
///
/// Delivery is at least once: anything polled but not committed is delivered
/// again after a restart or a [`redeliver`](Transport::redeliver).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publishes a message. Messages with the same key land on the same
    /// partition.
    async fn publish(&self, message: OutboundMessage) -> Result<(), TransportError>;

    /// Subscribes to topics. An entry ending in `*` subscribes to every topic
    /// with that prefix, including topics created later.
    async fn subscribe(&self, topics: &[String]) -> Result<(), TransportError>;

    /// Returns the next available message, or `None` when nothing is ready.
    async fn poll(&self) -> Result<Option<InboundMessage>, TransportError>;

    /// Marks `offset` and everything before it on the partition as processed.
    async fn commit(&self, topic: &str, partition: i32, offset: i64)
    -> Result<(), TransportError>;

    /// Rewinds the partition so `offset` is the next message polled from it.
    /// A position already at or before `offset` is left alone, so concurrent
    /// rewinds settle on the earliest offset.
    async fn redeliver(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<(), TransportError>;

    /// Stops `poll` from returning messages of the partition until
    /// [`resume`](Transport::resume) is called. Other partitions keep flowing.
    async fn pause(&self, topic: &str, partition: i32) -> Result<(), TransportError>;

    /// Lets `poll` return messages of a paused partition again.
    async fn resume(&self, topic: &str, partition: i32) -> Result<(), TransportError>;

    /// Closes the consuming side of the client. Later subscribe, poll, commit
    /// and redeliver calls fail with [`TransportError::Disconnected`].
    async fn disconnect(&self) -> Result<(), TransportError>;
}
