//! In-process partitioned log.
//!
//! Backs local mode and tests. Topics are created on first publish, keys are
//! hashed onto a fixed number of partitions and every partition keeps its own
//! cursor and committed offset, mirroring a real broker closely enough for the
//! consumer runtime's ordering and redelivery guarantees to be exercised.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::error::TransportError;
use crate::message::{Headers, InboundMessage, OutboundMessage};
use crate::registry::TopicPattern;
use crate::transport::Transport;

/// Partitions per topic when none is given.
pub const DEFAULT_PARTITIONS: i32 = 3;

#[derive(Debug, Clone)]
struct Record {
    key: Option<Vec<u8>>,
    value: Vec<u8>,
    headers: Headers,
}

type PartitionId = (String, i32);

#[derive(Debug, Default)]
struct LogState {
    topics: BTreeMap<String, Vec<Vec<Record>>>,
    subscriptions: Vec<TopicPattern>,
    cursors: HashMap<PartitionId, i64>,
    committed: HashMap<PartitionId, i64>,
    paused: HashSet<PartitionId>,
    commit_history: Vec<(String, i32, i64)>,
    rejected_publishes: HashMap<String, usize>,
    next_partition: usize,
    disconnected: bool,
}

impl LogState {
    fn subscribed_partitions(&self) -> Vec<PartitionId> {
        self.topics
            .iter()
            .filter(|(topic, _)| self.subscriptions.iter().any(|p| p.matches(topic)))
            .flat_map(|(topic, partitions)| {
                (0..partitions.len()).map(move |p| (topic.clone(), partition_index(p)))
            })
            .filter(|id| !self.paused.contains(id))
            .collect()
    }

    fn cursor(&self, id: &PartitionId) -> i64 {
        self.cursors
            .get(id)
            .copied()
            .or_else(|| self.committed.get(id).map(|offset| offset + 1))
            .unwrap_or(0)
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.disconnected {
            Err(TransportError::Disconnected)
        } else {
            Ok(())
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn partition_index(index: usize) -> i32 {
    index as i32
}

/// A shared in-memory log. Clones share the same state, so one clone can
/// publish while another consumes.
#[derive(Debug, Clone)]
pub struct InMemoryLog {
    state: Arc<Mutex<LogState>>,
    partitions: i32,
}

impl InMemoryLog {
    /// Creates a log with [`DEFAULT_PARTITIONS`] partitions per topic.
    #[must_use]
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Creates a log with `partitions` partitions per topic (at least one).
    #[must_use]
    pub fn with_partitions(partitions: i32) -> Self {
        Self {
            state: Arc::default(),
            partitions: partitions.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Partition a key is assigned to. Messages without a key go to partition 0.
    #[must_use]
    pub fn partition_for(&self, key: Option<&[u8]>) -> i32 {
        let Some(key) = key else {
            return 0;
        };
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let partitions = u64::from(self.partitions.unsigned_abs());
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let partition = (hasher.finish() % partitions) as i32;
        partition
    }

    /// Makes the next `count` publishes to `topic` fail.
    pub fn reject_publishes(&self, topic: &str, count: usize) {
        self.state()
            .rejected_publishes
            .insert(topic.to_owned(), count);
    }

    /// Last committed offset of a partition.
    #[must_use]
    pub fn committed_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.state()
            .committed
            .get(&(topic.to_owned(), partition))
            .copied()
    }

    /// Every commit in the order it happened, as `(topic, partition, offset)`.
    #[must_use]
    pub fn commit_history(&self) -> Vec<(String, i32, i64)> {
        self.state().commit_history.clone()
    }

    /// Every message ever published to `topic`, partition by partition.
    #[must_use]
    pub fn topic_messages(&self, topic: &str) -> Vec<InboundMessage> {
        let state = self.state();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };
        partitions
            .iter()
            .enumerate()
            .flat_map(|(p, records)| {
                records.iter().enumerate().map(move |(offset, record)| {
                    to_inbound(topic, partition_index(p), offset_index(offset), record)
                })
            })
            .collect()
    }

    /// Names of every topic that received at least one message.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.state().topics.keys().cloned().collect()
    }

    /// Returns `true` until [`Transport::disconnect`] is called.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.state().disconnected
    }
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::cast_possible_wrap)]
fn offset_index(index: usize) -> i64 {
    index as i64
}

fn to_inbound(topic: &str, partition: i32, offset: i64, record: &Record) -> InboundMessage {
    InboundMessage {
        topic: topic.to_owned(),
        partition,
        offset,
        key: record.key.clone(),
        value: record.value.clone(),
        headers: record.headers.clone(),
    }
}

#[async_trait]
impl Transport for InMemoryLog {
    async fn publish(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let partition = self.partition_for(message.key.as_deref());
        let mut state = self.state();
        if let Some(remaining) = state.rejected_publishes.get_mut(&message.topic) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::Publish {
                    topic: message.topic,
                    reason: "publish rejected".into(),
                });
            }
        }
        let partitions = usize::try_from(self.partitions).unwrap_or(1);
        let records = state
            .topics
            .entry(message.topic.clone())
            .or_insert_with(|| vec![Vec::new(); partitions]);
        let index = usize::try_from(partition).unwrap_or_default();
        let Some(records) = records.get_mut(index) else {
            return Err(TransportError::Publish {
                topic: message.topic,
                reason: format!("partition {partition} out of range"),
            });
        };
        records.push(Record {
            key: message.key,
            value: message.value,
            headers: message.headers,
        });
        debug!(topic = %message.topic, partition, "message appended");
        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<(), TransportError> {
        let mut state = self.state();
        state.ensure_connected()?;
        for topic in topics {
            let pattern = TopicPattern::parse(topic);
            if !state.subscriptions.contains(&pattern) {
                state.subscriptions.push(pattern);
            }
        }
        Ok(())
    }

    async fn poll(&self) -> Result<Option<InboundMessage>, TransportError> {
        let mut state = self.state();
        state.ensure_connected()?;
        let partitions = state.subscribed_partitions();
        if partitions.is_empty() {
            return Ok(None);
        }
        let start = state.next_partition % partitions.len();
        for step in 0..partitions.len() {
            let index = (start + step) % partitions.len();
            let id = &partitions[index];
            let cursor = state.cursor(id);
            let record = usize::try_from(cursor).ok().and_then(|offset| {
                state
                    .topics
                    .get(&id.0)
                    .and_then(|parts| usize::try_from(id.1).ok().and_then(|p| parts.get(p)))
                    .and_then(|records| records.get(offset))
                    .cloned()
            });
            if let Some(record) = record {
                let message = to_inbound(&id.0, id.1, cursor, &record);
                state.cursors.insert(id.clone(), cursor + 1);
                state.next_partition = index + 1;
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    async fn commit(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        state.ensure_connected()?;
        state.committed.insert((topic.to_owned(), partition), offset);
        state
            .commit_history
            .push((topic.to_owned(), partition, offset));
        Ok(())
    }

    async fn redeliver(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        state.ensure_connected()?;
        let id = (topic.to_owned(), partition);
        let cursor = state.cursor(&id).min(offset);
        state.cursors.insert(id, cursor);
        Ok(())
    }

    async fn pause(&self, topic: &str, partition: i32) -> Result<(), TransportError> {
        let mut state = self.state();
        state.ensure_connected()?;
        state.paused.insert((topic.to_owned(), partition));
        Ok(())
    }

    async fn resume(&self, topic: &str, partition: i32) -> Result<(), TransportError> {
        let mut state = self.state();
        state.ensure_connected()?;
        state.paused.remove(&(topic.to_owned(), partition));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.state().disconnected = true;
        Ok(())
    }
}
