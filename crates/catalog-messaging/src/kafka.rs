//! Kafka transport backed by librdkafka.
//!
//! Offsets are committed by the runtime only, never automatically, and a
//! redeliver seeks the consumer back so the partition replays from the
//! rewound offset. Message headers travel as Kafka record headers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, Headers as _, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Message, Offset, TopicPartitionList};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::message::{Headers, InboundMessage, OutboundMessage};
use crate::transport::Transport;

/// Connection settings for [`KafkaTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    /// Comma separated `host:port` bootstrap list.
    pub brokers: String,
    /// Consumer group the runtime joins.
    pub group_id: String,
    /// How long one `poll` waits for a message before returning `None`.
    pub poll_timeout: Duration,
    /// Delivery deadline for a single publish.
    pub send_timeout: Duration,
}

impl KafkaConfig {
    /// Settings with the default timeouts.
    #[must_use]
    pub fn new(brokers: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            group_id: group_id.into(),
            poll_timeout: Duration::from_millis(100),
            send_timeout: Duration::from_secs(5),
        }
    }
}

/// A [`Transport`] over a Kafka cluster.
pub struct KafkaTransport {
    consumer: StreamConsumer,
    producer: FutureProducer,
    config: KafkaConfig,
    seek_lock: Mutex<()>,
    disconnected: AtomicBool,
}

impl KafkaTransport {
    /// Creates the consumer and producer clients. Brokers are contacted
    /// lazily, so an unreachable cluster surfaces on first use.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Other`] if librdkafka rejects the
    /// configuration.
    pub fn connect(config: KafkaConfig) -> Result<Self, TransportError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(kafka_error)?;
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", config.send_timeout.as_millis().to_string())
            .create()
            .map_err(kafka_error)?;
        info!(brokers = %config.brokers, group_id = %config.group_id, "kafka clients created");
        Ok(Self {
            consumer,
            producer,
            config,
            seek_lock: Mutex::new(()),
            disconnected: AtomicBool::new(false),
        })
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.disconnected.load(Ordering::Acquire) {
            Err(TransportError::Disconnected)
        } else {
            Ok(())
        }
    }

    fn partition_list(topic: &str, partition: i32) -> TopicPartitionList {
        let mut list = TopicPartitionList::new();
        list.add_partition(topic, partition);
        list
    }

    fn position(&self, topic: &str, partition: i32) -> Result<Option<i64>, TransportError> {
        let positions = self.consumer.position().map_err(kafka_error)?;
        Ok(positions
            .find_partition(topic, partition)
            .and_then(|entry| match entry.offset() {
                Offset::Offset(offset) => Some(offset),
                _ => None,
            }))
    }
}

fn kafka_error(err: KafkaError) -> TransportError {
    TransportError::Other(err.to_string())
}

/// Translates a subscription entry into librdkafka's form: a trailing `*`
/// becomes an anchored regular expression over the prefix.
fn subscription_name(topic: &str) -> String {
    match topic.strip_suffix('*') {
        Some(prefix) => {
            let mut pattern = String::from("^");
            for c in prefix.chars() {
                if ".^$|?*+()[]{}\\".contains(c) {
                    pattern.push('\\');
                }
                pattern.push(c);
            }
            pattern.push_str(".*");
            pattern
        }
        None => topic.to_owned(),
    }
}

fn to_kafka_headers(headers: &Headers) -> OwnedHeaders {
    headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |acc, (key, value)| {
            acc.insert(Header {
                key,
                value: Some(value),
            })
        })
}

fn from_kafka_headers(kafka: &impl rdkafka::message::Headers) -> Headers {
    kafka
        .iter()
        .map(|header| {
            (
                header.key.to_owned(),
                header.value.map(<[u8]>::to_vec).unwrap_or_default(),
            )
        })
        .collect()
}

fn to_inbound(message: &impl Message) -> InboundMessage {
    InboundMessage {
        topic: message.topic().to_owned(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        headers: message.headers().map(from_kafka_headers).unwrap_or_default(),
    }
}

#[async_trait]
impl Transport for KafkaTransport {
    async fn publish(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let mut record: FutureRecord<'_, Vec<u8>, Vec<u8>> = FutureRecord::to(&message.topic)
            .payload(&message.value)
            .headers(to_kafka_headers(&message.headers));
        if let Some(key) = &message.key {
            record = record.key(key);
        }
        match self
            .producer
            .send(record, Timeout::After(self.config.send_timeout))
            .await
        {
            Ok(_) => {
                debug!(topic = %message.topic, "message delivered");
                Ok(())
            }
            Err((err, _)) => Err(TransportError::Publish {
                topic: message.topic.clone(),
                reason: err.to_string(),
            }),
        }
    }

    async fn subscribe(&self, topics: &[String]) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let names: Vec<String> = topics.iter().map(|t| subscription_name(t)).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        self.consumer.subscribe(&names).map_err(kafka_error)?;
        info!(topics = ?names, "kafka subscription updated");
        Ok(())
    }

    async fn poll(&self) -> Result<Option<InboundMessage>, TransportError> {
        self.ensure_connected()?;
        match tokio::time::timeout(self.config.poll_timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Ok(message)) => Ok(Some(to_inbound(&message))),
            Ok(Err(err)) => Err(kafka_error(err)),
        }
    }

    async fn commit(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let mut list = TopicPartitionList::new();
        // Kafka stores the next offset to read.
        list.add_partition_offset(topic, partition, Offset::Offset(offset + 1))
            .map_err(kafka_error)?;
        self.consumer
            .commit(&list, CommitMode::Async)
            .map_err(|err| TransportError::Commit {
                topic: topic.to_owned(),
                partition,
                offset,
                reason: err.to_string(),
            })
    }

    async fn redeliver(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let _guard = self.seek_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self
            .position(topic, partition)?
            .is_some_and(|position| position <= offset)
        {
            return Ok(());
        }
        self.consumer
            .seek(topic, partition, Offset::Offset(offset), Timeout::After(self.config.send_timeout))
            .map_err(kafka_error)?;
        debug!(topic, partition, offset, "partition rewound");
        Ok(())
    }

    async fn pause(&self, topic: &str, partition: i32) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.consumer
            .pause(&Self::partition_list(topic, partition))
            .map_err(kafka_error)
    }

    async fn resume(&self, topic: &str, partition: i32) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.consumer
            .resume(&Self::partition_list(topic, partition))
            .map_err(kafka_error)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.consumer.unsubscribe();
        if let Err(err) = self.producer.flush(Timeout::After(self.config.send_timeout)) {
            warn!(error = %err, "producer flush failed on disconnect");
        }
        info!("kafka transport disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_topics_are_subscribed_verbatim() {
        assert_eq!(subscription_name("catalog.products"), "catalog.products");
    }

    #[test]
    fn test_prefix_subscription_becomes_an_anchored_regex() {
        assert_eq!(
            subscription_name("catalog.products.retry-*"),
            r"^catalog\.products\.retry-.*"
        );
    }

    #[test]
    fn test_headers_survive_the_kafka_representation() {
        // Arrange
        let mut headers = Headers::new();
        headers.insert("x-original-topic".to_owned(), b"catalog.products".to_vec());
        headers.insert("x-retry-attempt".to_owned(), b"2".to_vec());

        // Act
        let kafka = to_kafka_headers(&headers);

        // Assert
        assert_eq!(kafka.count(), 2);
        assert_eq!(from_kafka_headers(&kafka), headers);
    }

    #[test]
    fn test_config_defaults() {
        let config = KafkaConfig::new("localhost:9092", "catalog");

        assert_eq!(config.brokers, "localhost:9092");
        assert_eq!(config.poll_timeout, Duration::from_millis(100));
        assert_eq!(config.send_timeout, Duration::from_secs(5));
    }
}
