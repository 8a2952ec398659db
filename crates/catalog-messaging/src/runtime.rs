//! The consumer runtime: poll loop, per-partition workers and shutdown.
//!
//! One task polls the transport and fans messages out to one sequential
//! worker per `(topic, partition)`. A worker finalizes each message (commit,
//! republish then commit, or rewind) before it looks at the next one, so
//! commits within a partition always follow poll order. After a rewind the
//! worker drops whatever was prefetched for its partition until the rewound
//! offset comes back.
//!
//! The poll loop never waits on a worker. When a worker's inbox is full the
//! message is handed back to the transport and its partition is paused, then
//! resumed once the worker has room again, so one slow partition never holds
//! up the others.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use catalog_core::clock::Clock;
use futures::FutureExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::classifier::ErrorClassifier;
use crate::config::ConsumerConfig;
use crate::error::{ConfigError, ConsumerError};
use crate::handler::HandlerError;
use crate::message::{ChainPosition, InboundMessage, MessageContext, headers};
use crate::registry::HandlerRegistry;
use crate::retry::{Disposition, RetryRouter, build_router};
use crate::retry_cache::RetryCache;
use crate::transport::Transport;

/// Tuning knobs of the runtime itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Deadline for a single handler invocation.
    pub handler_timeout: Option<Duration>,
    /// Pause between polls when nothing is available.
    pub poll_interval: Duration,
    /// Messages buffered per partition worker.
    pub partition_buffer: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from(&ConsumerConfig::default())
    }
}

impl From<&ConsumerConfig> for RuntimeSettings {
    fn from(config: &ConsumerConfig) -> Self {
        Self {
            handler_timeout: config.handler_timeout(),
            poll_interval: config.poll_interval(),
            partition_buffer: config.partition_buffer.max(1),
        }
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    registry: HandlerRegistry,
    router: Arc<dyn RetryRouter>,
    classifier: ErrorClassifier,
    clock: Arc<dyn Clock>,
    settings: RuntimeSettings,
}

/// How a worker left a message.
enum Outcome {
    /// Committed, possibly after a republish.
    Finalized,
    /// The transport was rewound to this offset.
    Rewound(i64),
    /// Shutdown arrived before the outcome was known; nothing was committed.
    Interrupted,
}

enum Executed {
    Done,
    Rewound,
    Failed,
}

type PartitionId = (String, i32);

/// Consumes every subscribed topic until shutdown.
pub struct ConsumerRuntime {
    shared: Arc<Shared>,
}

impl ConsumerRuntime {
    /// Assembles a runtime from its parts.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: HandlerRegistry,
        router: Arc<dyn RetryRouter>,
        classifier: ErrorClassifier,
        clock: Arc<dyn Clock>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                registry,
                router,
                classifier,
                clock,
                settings,
            }),
        }
    }

    /// Assembles a runtime, its classifier and its retry router from
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid or the
    /// cache-counted strategy is selected without a cache.
    pub fn from_config(
        config: &ConsumerConfig,
        transport: Arc<dyn Transport>,
        registry: HandlerRegistry,
        cache: Option<Arc<dyn RetryCache>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let router = build_router(config, &registry, cache, Arc::clone(&clock))?;
        Ok(Self::new(
            transport,
            registry,
            router,
            config.classifier(),
            clock,
            RuntimeSettings::from(config),
        ))
    }

    /// Registered topics and patterns plus every retry topic the router
    /// consumes.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .shared
            .registry
            .patterns()
            .iter()
            .map(ToString::to_string)
            .chain(self.shared.router.subscriptions())
            .collect();
        topics.sort();
        topics.dedup();
        topics
    }

    /// Subscribes and processes messages until `shutdown` turns `true` (or
    /// its sender is dropped). In-flight messages are finalized, buffered ones
    /// are left uncommitted, then the transport is disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Transport`] if subscribing or disconnecting
    /// fails. Poll failures are logged and retried.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        let subscriptions = self.subscriptions();
        self.shared.transport.subscribe(&subscriptions).await?;
        info!(?subscriptions, "consumer runtime started");

        let mut workers: HashMap<PartitionId, mpsc::Sender<InboundMessage>> = HashMap::new();
        let mut paused: HashSet<PartitionId> = HashSet::new();
        let mut tasks = JoinSet::new();

        loop {
            self.resume_drained(&workers, &mut paused).await;
            let polled = tokio::select! {
                biased;
                () = stopped(&mut shutdown) => break,
                polled = self.shared.transport.poll() => polled,
            };
            match polled {
                Ok(Some(message)) => {
                    self.dispatch(message, &mut workers, &mut paused, &mut tasks, &shutdown)
                        .await;
                }
                Ok(None) => self.idle(&mut shutdown).await,
                Err(err) => {
                    error!(error = %err, "poll failed");
                    self.idle(&mut shutdown).await;
                }
            }
        }

        info!(workers = workers.len(), "consumer runtime stopping");
        drop(workers);
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "partition worker failed");
            }
        }
        self.shared.transport.disconnect().await?;
        info!("consumer runtime stopped");
        Ok(())
    }

    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            biased;
            () = stopped(shutdown) => {}
            () = tokio::time::sleep(self.shared.settings.poll_interval) => {}
        }
    }

    async fn dispatch(
        &self,
        message: InboundMessage,
        workers: &mut HashMap<PartitionId, mpsc::Sender<InboundMessage>>,
        paused: &mut HashSet<PartitionId>,
        tasks: &mut JoinSet<()>,
        shutdown: &watch::Receiver<bool>,
    ) {
        let id = (message.topic.clone(), message.partition);
        let sender = match workers.get(&id) {
            Some(sender) if !sender.is_closed() => sender.clone(),
            _ => {
                let sender = self.spawn_worker(&id, tasks, shutdown.clone());
                workers.insert(id.clone(), sender.clone());
                sender
            }
        };
        match sender.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                self.hand_back(&message).await;
                match self.shared.transport.pause(&id.0, id.1).await {
                    Ok(()) => {
                        debug!(topic = %id.0, partition = id.1, "partition paused, worker busy");
                        paused.insert(id);
                    }
                    Err(err) => {
                        warn!(topic = %id.0, partition = id.1, error = %err, "pause failed");
                    }
                }
            }
            Err(TrySendError::Closed(message)) => {
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "partition worker gone, message handed back"
                );
                self.hand_back(&message).await;
            }
        }
    }

    /// Rewinds the transport so a message the worker could not take is
    /// polled again later.
    async fn hand_back(&self, message: &InboundMessage) {
        if let Err(err) = self
            .shared
            .transport
            .redeliver(&message.topic, message.partition, message.offset)
            .await
        {
            error!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                error = %err,
                "hand back failed, message left uncommitted"
            );
        }
    }

    /// Resumes every paused partition whose worker has room again or is gone.
    async fn resume_drained(
        &self,
        workers: &HashMap<PartitionId, mpsc::Sender<InboundMessage>>,
        paused: &mut HashSet<PartitionId>,
    ) {
        if paused.is_empty() {
            return;
        }
        let drained: Vec<PartitionId> = paused
            .iter()
            .filter(|id| {
                workers
                    .get(*id)
                    .is_none_or(|sender| sender.is_closed() || sender.capacity() > 0)
            })
            .cloned()
            .collect();
        for id in drained {
            match self.shared.transport.resume(&id.0, id.1).await {
                Ok(()) => {
                    debug!(topic = %id.0, partition = id.1, "partition resumed");
                    paused.remove(&id);
                }
                Err(err) => {
                    warn!(topic = %id.0, partition = id.1, error = %err, "resume failed");
                }
            }
        }
    }

    fn spawn_worker(
        &self,
        id: &PartitionId,
        tasks: &mut JoinSet<()>,
        shutdown: watch::Receiver<bool>,
    ) -> mpsc::Sender<InboundMessage> {
        let (sender, inbox) = mpsc::channel(self.shared.settings.partition_buffer);
        let span = info_span!("partition_worker", topic = %id.0, partition = id.1);
        tasks.spawn(partition_worker(Arc::clone(&self.shared), inbox, shutdown).instrument(span));
        debug!(topic = %id.0, partition = id.1, "partition worker started");
        sender
    }
}

/// Completes once shutdown is requested or the shutdown sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn partition_worker(
    shared: Arc<Shared>,
    mut inbox: mpsc::Receiver<InboundMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut rewound_to: Option<i64> = None;
    loop {
        let message = tokio::select! {
            biased;
            () = stopped(&mut shutdown) => break,
            message = inbox.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        if let Some(offset) = rewound_to {
            if message.offset != offset {
                debug!(offset = message.offset, "discarding prefetched message");
                continue;
            }
            rewound_to = None;
        }
        match shared.process(&message, &mut shutdown).await {
            Outcome::Finalized => {}
            Outcome::Rewound(offset) => rewound_to = Some(offset),
            Outcome::Interrupted => break,
        }
    }
}

impl Shared {
    async fn process(
        &self,
        message: &InboundMessage,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Outcome {
        let ctx = self.router.context_for(message).await;
        if ctx.position() == ChainPosition::DeadLetter {
            debug!(
                topic = %message.topic,
                offset = message.offset,
                "skipping dead-letter topic"
            );
            self.commit(message).await;
            return Outcome::Finalized;
        }

        if let Some(wait) = self.retry_wait(message, &ctx) {
            debug!(offset = message.offset, ?wait, "waiting for retry delay");
            tokio::select! {
                biased;
                () = stopped(shutdown) => return Outcome::Interrupted,
                () = tokio::time::sleep(wait) => {}
            }
        }

        let disposition = match self.invoke(message, &ctx).await {
            Ok(()) => {
                debug!(
                    topic = %message.topic,
                    offset = message.offset,
                    attempt = ctx.attempt(),
                    "message handled"
                );
                self.router.on_success(message, &ctx).await
            }
            Err(err) => {
                let retryability = self.classifier.classify(&err);
                self.router
                    .on_failure(message, &ctx, &err, retryability)
                    .await
            }
        };

        // The disposition is final once decided; only the transport call
        // is repeated.
        loop {
            match self.execute(message, disposition.clone()).await {
                Executed::Done => return Outcome::Finalized,
                Executed::Rewound => return Outcome::Rewound(message.offset),
                Executed::Failed => {
                    tokio::select! {
                        biased;
                        () = stopped(shutdown) => return Outcome::Interrupted,
                        () = tokio::time::sleep(self.settings.poll_interval) => {}
                    }
                }
            }
        }
    }

    fn retry_wait(&self, message: &InboundMessage, ctx: &MessageContext) -> Option<Duration> {
        if !matches!(ctx.position(), ChainPosition::Retry(_)) {
            return None;
        }
        let not_before: i64 = message
            .header_str(headers::RETRY_NOT_BEFORE)?
            .trim()
            .parse()
            .ok()?;
        let remaining = not_before.saturating_sub(self.clock.now().timestamp_millis());
        u64::try_from(remaining)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    async fn invoke(
        &self,
        message: &InboundMessage,
        ctx: &MessageContext,
    ) -> Result<(), HandlerError> {
        let Some(handler) = self.registry.resolve(ctx.original_topic()) else {
            return Err(HandlerError::unprocessable(format!(
                "no handler registered for {}",
                ctx.original_topic()
            )));
        };
        let call = AssertUnwindSafe(handler.handle(&message.value, ctx)).catch_unwind();
        let outcome = match self.settings.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(HandlerError::timeout(format!(
                        "handler did not finish within {}ms",
                        limit.as_millis()
                    )));
                }
            },
            None => call.await,
        };
        outcome.unwrap_or_else(|panic| {
            Err(HandlerError::unknown(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            )))
        })
    }

    async fn execute(&self, message: &InboundMessage, disposition: Disposition) -> Executed {
        match disposition {
            Disposition::Commit | Disposition::Exhausted => {
                self.commit(message).await;
                Executed::Done
            }
            Disposition::Forward { message: out, .. } | Disposition::DeadLetter { message: out } => {
                let destination = out.topic.clone();
                match self.transport.publish(out).await {
                    Ok(()) => {
                        self.commit(message).await;
                        Executed::Done
                    }
                    Err(err) => {
                        error!(
                            topic = %message.topic,
                            partition = message.partition,
                            offset = message.offset,
                            destination = %destination,
                            error = %err,
                            "republish failed, offset left uncommitted"
                        );
                        Executed::Failed
                    }
                }
            }
            Disposition::Redeliver => {
                match self
                    .transport
                    .redeliver(&message.topic, message.partition, message.offset)
                    .await
                {
                    Ok(()) => Executed::Rewound,
                    Err(err) => {
                        error!(
                            topic = %message.topic,
                            partition = message.partition,
                            offset = message.offset,
                            error = %err,
                            "redeliver failed"
                        );
                        Executed::Failed
                    }
                }
            }
        }
    }

    async fn commit(&self, message: &InboundMessage) {
        if let Err(err) = self
            .transport
            .commit(&message.topic, message.partition, message.offset)
            .await
        {
            error!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                error = %err,
                "commit failed"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_reads_both_string_kinds() {
        let borrowed: Box<dyn Any + Send> = Box::new("boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let other: Box<dyn Any + Send> = Box::new(7_u8);

        assert_eq!(panic_message(borrowed.as_ref()), "boom");
        assert_eq!(panic_message(owned.as_ref()), "bang");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[test]
    fn test_settings_follow_config() {
        let config = ConsumerConfig {
            handler_timeout_ms: Some(250),
            poll_interval_ms: 5,
            partition_buffer: 4,
            ..ConsumerConfig::default()
        };

        let settings = RuntimeSettings::from(&config);

        assert_eq!(settings.handler_timeout, Some(Duration::from_millis(250)));
        assert_eq!(settings.poll_interval, Duration::from_millis(5));
        assert_eq!(settings.partition_buffer, 4);
    }
}
