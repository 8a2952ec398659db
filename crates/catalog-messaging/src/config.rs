//! Consumer configuration read from `CATALOG_CONSUMER_*` environment variables.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::classifier::ErrorClassifier;
use crate::error::ConfigError;
use crate::handler::ErrorKind;
use crate::retry::chain::{TOPIC_PLACEHOLDER, TopicNaming};

/// Which retry strategy the runtime uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryStrategy {
    /// Republish along retry topics, then dead-letter.
    #[default]
    TopicChain,
    /// Redeliver in place, counting attempts in a shared cache.
    CacheCounted,
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TopicChain => "topic-chain",
            Self::CacheCounted => "cache-counted",
        })
    }
}

impl FromStr for RetryStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "topic-chain" | "topic_chain" => Ok(Self::TopicChain),
            "cache-counted" | "cache_counted" => Ok(Self::CacheCounted),
            other => Err(ConfigError::invalid(
                "strategy",
                format!("`{other}` is neither `topic-chain` nor `cache-counted`"),
            )),
        }
    }
}

/// Settings of the consumer runtime and its retry router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Consumer group; part of every retry counter key.
    pub group_id: String,
    /// Retry strategy.
    pub strategy: RetryStrategy,
    /// Retries before a message is dead-lettered or force-committed.
    pub max_retries: u32,
    /// Delay before each retry attempt, in milliseconds.
    pub retry_delays_ms: Vec<u64>,
    /// Retry topic naming scheme.
    pub retry_topic_naming: TopicNaming,
    /// Dead-letter topic template; `{topic}` is replaced by the base topic.
    pub dead_letter_topic: String,
    /// Error kinds that are never retried.
    pub non_retriable_kinds: Vec<ErrorKind>,
    /// Per-invocation handler deadline.
    pub handler_timeout_ms: Option<u64>,
    /// TTL of cache-counted retry counters.
    pub retry_counter_ttl_secs: u64,
    /// Pause between polls when the transport has nothing to deliver.
    pub poll_interval_ms: u64,
    /// Messages buffered per partition worker.
    pub partition_buffer: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: "catalog-service".to_owned(),
            strategy: RetryStrategy::TopicChain,
            max_retries: 3,
            retry_delays_ms: vec![1_000, 5_000, 30_000],
            retry_topic_naming: TopicNaming::AttemptBased,
            dead_letter_topic: format!("{TOPIC_PLACEHOLDER}.dlq"),
            non_retriable_kinds: vec![ErrorKind::Validation, ErrorKind::Unprocessable],
            handler_timeout_ms: None,
            retry_counter_ttl_secs: 3_600,
            poll_interval_ms: 50,
            partition_buffer: 64,
        }
    }
}

const PREFIX: &str = "CATALOG_CONSUMER_";

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ConfigError::invalid(key, format!("`{raw}`: {e}")))
}

fn parse_list<T, F>(raw: &str, parse: F) -> Result<Vec<T>, ConfigError>
where
    F: Fn(&str) -> Result<T, ConfigError>,
{
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(parse)
        .collect()
}

impl ConsumerConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for any unparsable or inconsistent
    /// value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which is given full variable
    /// names such as `CATALOG_CONSUMER_MAX_RETRIES`. Unset variables keep
    /// their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for any unparsable or inconsistent
    /// value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{PREFIX}{name}"));
        let mut config = Self::default();

        if let Some(raw) = get("GROUP_ID") {
            config.group_id = raw.trim().to_owned();
        }
        if let Some(raw) = get("STRATEGY") {
            config.strategy = raw.parse()?;
        }
        if let Some(raw) = get("MAX_RETRIES") {
            config.max_retries = parse_number("max_retries", &raw)?;
        }
        if let Some(raw) = get("RETRY_DELAYS_MS") {
            config.retry_delays_ms =
                parse_list(&raw, |item| parse_number("retry_delays_ms", item))?;
        }
        if let Some(raw) = get("RETRY_TOPIC_NAMING") {
            config.retry_topic_naming = raw.parse()?;
        }
        if let Some(raw) = get("DEAD_LETTER_TOPIC") {
            config.dead_letter_topic = raw.trim().to_owned();
        }
        if let Some(raw) = get("NON_RETRIABLE_KINDS") {
            config.non_retriable_kinds = parse_list(&raw, |item| {
                item.parse::<ErrorKind>()
                    .map_err(|e| ConfigError::invalid("non_retriable_kinds", e.to_string()))
            })?;
        }
        if let Some(raw) = get("HANDLER_TIMEOUT_MS") {
            config.handler_timeout_ms = match raw.trim() {
                "" => None,
                value => Some(parse_number("handler_timeout_ms", value)?),
            };
        }
        if let Some(raw) = get("RETRY_COUNTER_TTL_SECS") {
            config.retry_counter_ttl_secs = parse_number("retry_counter_ttl_secs", &raw)?;
        }
        if let Some(raw) = get("POLL_INTERVAL_MS") {
            config.poll_interval_ms = parse_number("poll_interval_ms", &raw)?;
        }
        if let Some(raw) = get("PARTITION_BUFFER") {
            config.partition_buffer = parse_number("partition_buffer", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks values that parse but cannot work together.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group_id.is_empty() {
            return Err(ConfigError::invalid("group_id", "must not be empty"));
        }
        if self.dead_letter_topic.is_empty() {
            return Err(ConfigError::invalid("dead_letter_topic", "must not be empty"));
        }
        if self.partition_buffer == 0 {
            return Err(ConfigError::invalid("partition_buffer", "must be at least 1"));
        }
        if self.handler_timeout_ms == Some(0) {
            return Err(ConfigError::invalid("handler_timeout_ms", "must be positive"));
        }
        if self.strategy == RetryStrategy::CacheCounted && self.retry_counter_ttl_secs == 0 {
            return Err(ConfigError::invalid(
                "retry_counter_ttl_secs",
                "must be positive",
            ));
        }
        Ok(())
    }

    /// Classifier built from [`non_retriable_kinds`](Self::non_retriable_kinds).
    #[must_use]
    pub fn classifier(&self) -> ErrorClassifier {
        ErrorClassifier::new(self.non_retriable_kinds.iter().copied())
    }

    /// Handler deadline, if any.
    #[must_use]
    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }

    /// Idle pause between polls.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
