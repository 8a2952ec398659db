//! Retry routing: turns a handler outcome into what happens to the message.

pub mod cache_counted;
pub mod chain;
pub mod topic_chain;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use catalog_core::clock::Clock;

use crate::classifier::Retryability;
use crate::config::{ConsumerConfig, RetryStrategy};
use crate::error::ConfigError;
use crate::handler::HandlerError;
use crate::message::{InboundMessage, MessageContext, OutboundMessage};
use crate::registry::HandlerRegistry;
use crate::retry_cache::RetryCache;

pub use cache_counted::CacheCountedRouter;
pub use chain::{DeadLetterTemplate, Hop, RetryTopicChain, TopicChains, TopicNaming};
pub use topic_chain::TopicChainRouter;

/// What the runtime does with a message once its outcome is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Commit the offset that was read.
    Commit,
    /// Publish to the next retry topic, then commit.
    Forward {
        /// The republished message.
        message: OutboundMessage,
        /// Attempt the message will be on.
        attempt: u32,
    },
    /// Publish to the dead-letter topic, then commit.
    DeadLetter {
        /// The dead-lettered message.
        message: OutboundMessage,
    },
    /// Leave the offset uncommitted and read it again.
    Redeliver,
    /// Retries are exhausted and the failure was logged; commit anyway.
    Exhausted,
}

/// A retry strategy.
#[async_trait]
pub trait RetryRouter: Send + Sync {
    /// Topics the runtime must subscribe to besides the registered ones.
    fn subscriptions(&self) -> Vec<String>;

    /// Resolves the origin, attempt and chain position of a polled message.
    async fn context_for(&self, message: &InboundMessage) -> MessageContext;

    /// Decides the outcome of a successful delivery.
    async fn on_success(&self, message: &InboundMessage, ctx: &MessageContext) -> Disposition;

    /// Decides the outcome of a failed delivery.
    async fn on_failure(
        &self,
        message: &InboundMessage,
        ctx: &MessageContext,
        error: &HandlerError,
        retryability: Retryability,
    ) -> Disposition;
}

/// Builds the router selected by `config`.
///
/// # Errors
///
/// Returns [`ConfigError::Missing`] when the cache-counted strategy is
/// selected without a retry cache.
pub fn build_router(
    config: &ConsumerConfig,
    registry: &HandlerRegistry,
    cache: Option<Arc<dyn RetryCache>>,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn RetryRouter>, ConfigError> {
    match config.strategy {
        RetryStrategy::TopicChain => {
            let chains = TopicChains::new(
                config.retry_topic_naming,
                config.max_retries,
                DeadLetterTemplate::new(config.dead_letter_topic.clone()),
                registry.exact_topics(),
            );
            let delays = config
                .retry_delays_ms
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect();
            Ok(Arc::new(TopicChainRouter::new(chains, delays, clock)))
        }
        RetryStrategy::CacheCounted => {
            let cache = cache.ok_or_else(|| ConfigError::Missing("retry cache".into()))?;
            Ok(Arc::new(CacheCountedRouter::new(
                cache,
                config.group_id.clone(),
                config.max_retries,
                Duration::from_secs(config.retry_counter_ttl_secs),
            )))
        }
    }
}
