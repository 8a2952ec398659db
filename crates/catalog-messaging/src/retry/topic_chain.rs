//! Topic-Chain strategy: failed messages move along retry topics and end on a
//! dead-letter topic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use catalog_core::clock::Clock;
use tracing::{info, warn};

use super::chain::{Hop, TopicChains};
use super::{Disposition, RetryRouter};
use crate::classifier::Retryability;
use crate::handler::HandlerError;
use crate::message::{InboundMessage, MessageContext, OutboundMessage, headers};

/// Republishes failed messages to `retry-1 … retry-N`, then to the
/// dead-letter topic. Every hop is committed on the topic that was read.
pub struct TopicChainRouter {
    chains: TopicChains,
    delays: Vec<Duration>,
    clock: Arc<dyn Clock>,
}

impl TopicChainRouter {
    /// Creates the router. `delays[k - 1]` is the delay before attempt `k`;
    /// attempts past the end reuse the last delay.
    #[must_use]
    pub fn new(chains: TopicChains, delays: Vec<Duration>, clock: Arc<dyn Clock>) -> Self {
        Self {
            chains,
            delays,
            clock,
        }
    }

    /// Delay before attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = usize::try_from(attempt.saturating_sub(1)).unwrap_or(usize::MAX);
        self.delays
            .get(index)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    fn not_before_ms(&self, attempt: u32) -> i64 {
        let delay = i64::try_from(self.delay_for(attempt).as_millis()).unwrap_or(i64::MAX);
        self.clock
            .now()
            .timestamp_millis()
            .saturating_add(delay)
    }
}

fn with_diagnostics(message: OutboundMessage, error: &HandlerError) -> OutboundMessage {
    message
        .with_header(headers::ERROR_KIND, error.kind().as_str())
        .with_header(headers::ERROR_MESSAGE, error.message())
}

#[async_trait]
impl RetryRouter for TopicChainRouter {
    fn subscriptions(&self) -> Vec<String> {
        self.chains.retry_subscriptions()
    }

    async fn context_for(&self, message: &InboundMessage) -> MessageContext {
        let resolved = self.chains.resolve(&message.topic, &message.headers);
        MessageContext::resolved(message, resolved.base, resolved.attempt, resolved.position)
    }

    async fn on_success(&self, _message: &InboundMessage, _ctx: &MessageContext) -> Disposition {
        Disposition::Commit
    }

    async fn on_failure(
        &self,
        message: &InboundMessage,
        ctx: &MessageContext,
        error: &HandlerError,
        retryability: Retryability,
    ) -> Disposition {
        let chain = self.chains.chain(ctx.original_topic());
        let hop = match retryability {
            Retryability::NonRetriable => Hop::DeadLetter {
                topic: chain.dead_letter_topic().to_owned(),
            },
            Retryability::Retriable => chain.next_hop(ctx.attempt()),
        };
        match hop {
            Hop::Retry { topic, attempt } => {
                info!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    retry_topic = %topic,
                    attempt,
                    error = %error,
                    "scheduling retry"
                );
                let forwarded = OutboundMessage::forward(message, topic)
                    .with_header(headers::ORIGINAL_TOPIC, chain.base())
                    .with_header(headers::RETRY_ATTEMPT, attempt.to_string())
                    .with_header(headers::ASYNC_RETRY, "true")
                    .with_header(
                        headers::RETRY_NOT_BEFORE,
                        self.not_before_ms(attempt).to_string(),
                    );
                Disposition::Forward {
                    message: with_diagnostics(forwarded, error),
                    attempt,
                }
            }
            Hop::DeadLetter { topic } => {
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    dead_letter_topic = %topic,
                    attempt = ctx.attempt(),
                    error = %error,
                    "dead-lettering message"
                );
                let mut dead = OutboundMessage::forward(message, topic)
                    .with_header(headers::ORIGINAL_TOPIC, chain.base())
                    .with_header(headers::RETRY_ATTEMPT, ctx.attempt().to_string());
                dead.headers.remove(headers::RETRY_NOT_BEFORE);
                Disposition::DeadLetter {
                    message: with_diagnostics(dead, error),
                }
            }
        }
    }
}
