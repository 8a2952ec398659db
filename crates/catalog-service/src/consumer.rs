//! Consumer runtime wiring for the product search projection.

use std::sync::Arc;

use catalog_core::clock::Clock;
use catalog_messaging::config::RetryStrategy;
use catalog_messaging::handler::MessageHandler;
use catalog_messaging::kafka::{KafkaConfig, KafkaTransport};
use catalog_messaging::memory::InMemoryLog;
use catalog_messaging::registry::HandlerRegistry;
use catalog_messaging::retry_cache::{InMemoryRetryCache, RedisRetryCache, RetryCache};
use catalog_messaging::runtime::ConsumerRuntime;
use catalog_messaging::transport::Transport;
use catalog_product::application::search_projection::{
    ProductSearchIndex, ProductSearchProjection,
};
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::error::AppError;

/// Key prefix for retry counters stored in Redis.
pub const RETRY_KEY_PREFIX: &str = "catalog:";

/// Selects the message log: Kafka when `KAFKA_BROKERS` is set, otherwise an
/// in-process log that only this instance can see.
///
/// # Errors
///
/// Returns `AppError::Transport` if the Kafka clients cannot be created.
pub fn transport(config: &ServiceConfig) -> Result<Arc<dyn Transport>, AppError> {
    if let Some(brokers) = &config.kafka_brokers {
        let kafka = KafkaTransport::connect(KafkaConfig::new(
            brokers.as_str(),
            config.consumer.group_id.as_str(),
        ))?;
        info!(%brokers, "integration events flow through kafka");
        return Ok(Arc::new(kafka));
    }
    warn!("KAFKA_BROKERS not set; integration events stay in this process");
    Ok(Arc::new(InMemoryLog::new()))
}

/// Selects the retry counter store: Redis when `REDIS_URL` is set,
/// otherwise a process-local cache.
///
/// # Errors
///
/// Returns `AppError::Cache` if Redis cannot be reached.
pub async fn retry_cache(config: &ServiceConfig) -> Result<Arc<dyn RetryCache>, AppError> {
    if let Some(url) = &config.redis_url {
        let cache = RedisRetryCache::connect(url, RETRY_KEY_PREFIX).await?;
        info!("retry counters stored in redis");
        return Ok(Arc::new(cache));
    }
    if config.consumer.strategy == RetryStrategy::CacheCounted {
        warn!("REDIS_URL not set; retry counters are not shared between instances");
    }
    Ok(Arc::new(InMemoryRetryCache::new()))
}

/// Builds a runtime that projects `config.product_topic` into `index`.
///
/// # Errors
///
/// Returns `AppError::Consumer` if the consumer configuration is invalid.
pub fn build_runtime(
    config: &ServiceConfig,
    transport: Arc<dyn Transport>,
    index: Arc<dyn ProductSearchIndex>,
    cache: Arc<dyn RetryCache>,
    clock: Arc<dyn Clock>,
) -> Result<ConsumerRuntime, AppError> {
    let projection: Arc<dyn MessageHandler> = Arc::new(ProductSearchProjection::new(index));
    let registry = HandlerRegistry::builder()
        .route(&config.product_topic, projection)
        .build()?;
    Ok(ConsumerRuntime::from_config(
        &config.consumer,
        transport,
        registry,
        Some(cache),
        clock,
    )?)
}
