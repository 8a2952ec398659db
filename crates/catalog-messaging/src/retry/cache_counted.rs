//! Cache-Counted strategy: failed messages are redelivered in place while a
//! shared counter tracks attempts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, warn};

use super::{Disposition, RetryRouter};
use crate::classifier::Retryability;
use crate::handler::HandlerError;
use crate::message::{ChainPosition, InboundMessage, MessageContext};
use crate::retry_cache::RetryCache;

/// Redelivers a failing offset up to `max_retries` times, then logs it and
/// commits past it. The counter is removed on every terminal outcome; its TTL
/// only matters if the process dies mid-retry.
pub struct CacheCountedRouter {
    cache: Arc<dyn RetryCache>,
    group_id: String,
    max_retries: u32,
    ttl: Duration,
}

impl CacheCountedRouter {
    /// Creates the router.
    #[must_use]
    pub fn new(
        cache: Arc<dyn RetryCache>,
        group_id: impl Into<String>,
        max_retries: u32,
        ttl: Duration,
    ) -> Self {
        Self {
            cache,
            group_id: group_id.into(),
            max_retries,
            ttl,
        }
    }

    /// Counter key for a message.
    #[must_use]
    pub fn counter_key(&self, message: &InboundMessage) -> String {
        format!(
            "retry:{}:{}:{}:{}",
            self.group_id, message.topic, message.partition, message.offset
        )
    }

    async fn clear(&self, message: &InboundMessage) {
        let key = self.counter_key(message);
        if let Err(err) = self.cache.delete(&key).await {
            warn!(key = %key, error = %err, "failed to delete retry counter");
        }
    }
}

#[async_trait]
impl RetryRouter for CacheCountedRouter {
    fn subscriptions(&self) -> Vec<String> {
        Vec::new()
    }

    async fn context_for(&self, message: &InboundMessage) -> MessageContext {
        let key = self.counter_key(message);
        let attempt = match self.cache.get(&key).await {
            Ok(count) => count.map_or(0, |c| u32::try_from(c).unwrap_or(u32::MAX)),
            Err(err) => {
                warn!(key = %key, error = %err, "retry counter unreadable");
                0
            }
        };
        let position = if attempt == 0 {
            ChainPosition::Primary
        } else {
            ChainPosition::Retry(attempt)
        };
        MessageContext::resolved(message, message.topic.clone(), attempt, position)
    }

    async fn on_success(&self, message: &InboundMessage, _ctx: &MessageContext) -> Disposition {
        self.clear(message).await;
        Disposition::Commit
    }

    async fn on_failure(
        &self,
        message: &InboundMessage,
        _ctx: &MessageContext,
        failure: &HandlerError,
        retryability: Retryability,
    ) -> Disposition {
        if retryability == Retryability::NonRetriable {
            error!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                key = %message.key_text(),
                error = %failure,
                "non-retriable failure, committing"
            );
            self.clear(message).await;
            return Disposition::Commit;
        }

        let key = self.counter_key(message);
        match self.cache.increment(&key, self.ttl).await {
            Ok(count) if count <= u64::from(self.max_retries) => {
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    attempt = count,
                    max_retries = self.max_retries,
                    error = %failure,
                    "redelivering message"
                );
                Disposition::Redeliver
            }
            Ok(count) => {
                error!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    key = %message.key_text(),
                    payload = %String::from_utf8_lossy(&message.value),
                    attempts = count,
                    max_retries = self.max_retries,
                    error = %failure,
                    "retries exhausted, committing"
                );
                self.clear(message).await;
                Disposition::Exhausted
            }
            Err(cache_err) => {
                error!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    key = %message.key_text(),
                    payload = %String::from_utf8_lossy(&message.value),
                    error = %failure,
                    cache_error = %cache_err,
                    "retry cache unavailable, committing"
                );
                Disposition::Exhausted
            }
        }
    }
}
