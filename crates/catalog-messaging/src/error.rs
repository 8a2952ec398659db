//! Error types for the messaging layer.

use thiserror::Error;

/// Failures reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// Publishing a message failed.
    #[error("publish to {topic} failed: {reason}")]
    Publish {
        /// Destination topic.
        topic: String,
        /// Why the transport refused the message.
        reason: String,
    },

    /// Committing an offset failed.
    #[error("commit of {topic}[{partition}]@{offset} failed: {reason}")]
    Commit {
        /// Topic of the offset.
        topic: String,
        /// Partition of the offset.
        partition: i32,
        /// The offset being committed.
        offset: i64,
        /// Why the commit failed.
        reason: String,
    },

    /// The transport has been disconnected.
    #[error("transport disconnected")]
    Disconnected,

    /// Any other transport failure.
    #[error("transport error: {0}")]
    Other(String),
}

/// Failures reported by a [`RetryCache`](crate::retry_cache::RetryCache).
#[derive(Debug, Error)]
pub enum RetryCacheError {
    /// The cache could not be reached or rejected the command.
    #[error("retry cache unavailable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for RetryCacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Invalid consumer configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting has a value that cannot be used.
    #[error("invalid value for {key}: {reason}")]
    Invalid {
        /// The setting name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A component required by the chosen configuration is missing.
    #[error("missing {0}")]
    Missing(String),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Errors that stop the consumer runtime.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The transport failed while subscribing or disconnecting.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The runtime was assembled from invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
