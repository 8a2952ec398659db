//! Message types exchanged with the transport.

use std::collections::BTreeMap;

/// Message headers; values are raw bytes.
pub type Headers = BTreeMap<String, Vec<u8>>;

/// Header names understood by the consumer runtime.
pub mod headers {
    /// Topic the message was first published to.
    pub const ORIGINAL_TOPIC: &str = "x-original-topic";
    /// Retry attempt the message is on (1 for the first retry topic).
    pub const RETRY_ATTEMPT: &str = "x-retry-attempt";
    /// Marks a message republished by the retry router.
    pub const ASYNC_RETRY: &str = "x-async-retry";
    /// Earliest time, in epoch milliseconds, the retry should be handled.
    pub const RETRY_NOT_BEFORE: &str = "x-retry-not-before";
    /// Kind of the last handler failure.
    pub const ERROR_KIND: &str = "x-error-kind";
    /// Message of the last handler failure.
    pub const ERROR_MESSAGE: &str = "x-error-message";
}

/// A message polled from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message was read from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Partitioning key.
    pub key: Option<Vec<u8>>,
    /// Payload.
    pub value: Vec<u8>,
    /// Headers.
    pub headers: Headers,
}

impl InboundMessage {
    /// Returns a header value as UTF-8 text.
    #[must_use]
    pub fn header_str(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }

    /// Lossy text rendering of the key, for logs.
    #[must_use]
    pub fn key_text(&self) -> String {
        self.key
            .as_deref()
            .map(|key| String::from_utf8_lossy(key).into_owned())
            .unwrap_or_default()
    }
}

/// A message handed to the transport for publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination topic.
    pub topic: String,
    /// Partitioning key.
    pub key: Option<Vec<u8>>,
    /// Payload.
    pub value: Vec<u8>,
    /// Headers.
    pub headers: Headers,
}

impl OutboundMessage {
    /// Creates a message without key or headers.
    pub fn new(topic: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value: value.into(),
            headers: Headers::new(),
        }
    }

    /// Copies key, payload and headers of a polled message onto a new topic.
    #[must_use]
    pub fn forward(message: &InboundMessage, topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key: message.key.clone(),
            value: message.value.clone(),
            headers: message.headers.clone(),
        }
    }

    /// Sets the partitioning key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets (or replaces) a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(name.to_owned(), value.into());
        self
    }

    /// Returns a header value as UTF-8 text.
    #[must_use]
    pub fn header_str(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }
}

fn header_str<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| std::str::from_utf8(value).ok())
}

/// Where a polled topic sits in a retry chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainPosition {
    /// The topic a handler is registered for.
    Primary,
    /// The n-th retry topic (1-based).
    Retry(u32),
    /// The dead-letter topic; never handled.
    DeadLetter,
}

/// Delivery metadata handed to a handler alongside the payload.
#[derive(Debug, Clone)]
pub struct MessageContext {
    topic: String,
    partition: i32,
    offset: i64,
    key: Option<Vec<u8>>,
    headers: Headers,
    original_topic: String,
    attempt: u32,
    position: ChainPosition,
}

impl MessageContext {
    /// Context for a message read from the topic its handler is registered for.
    #[must_use]
    pub fn primary(message: &InboundMessage) -> Self {
        Self::resolved(message, message.topic.clone(), 0, ChainPosition::Primary)
    }

    /// Context with a resolved origin, attempt and chain position.
    #[must_use]
    pub fn resolved(
        message: &InboundMessage,
        original_topic: String,
        attempt: u32,
        position: ChainPosition,
    ) -> Self {
        Self {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            key: message.key.clone(),
            headers: message.headers.clone(),
            original_topic,
            attempt,
            position,
        }
    }

    /// Topic the message was actually polled from.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Partition the message was polled from.
    #[must_use]
    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Offset of the message.
    #[must_use]
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Partitioning key.
    #[must_use]
    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    /// Message headers.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Topic the message was first published to.
    #[must_use]
    pub fn original_topic(&self) -> &str {
        &self.original_topic
    }

    /// Number of earlier failed attempts; 0 on the first delivery.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Position of the polled topic in its retry chain.
    #[must_use]
    pub fn position(&self) -> ChainPosition {
        self.position
    }

    /// Returns `true` when this delivery is a retry.
    #[must_use]
    pub fn is_retry(&self) -> bool {
        self.attempt > 0
    }
}
