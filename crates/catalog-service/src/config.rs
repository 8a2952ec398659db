//! Service configuration read from the environment.

use std::net::SocketAddr;

use catalog_messaging::config::ConsumerConfig;

use crate::error::AppError;

/// Default topic product integration events are published to.
pub const DEFAULT_PRODUCT_TOPIC: &str = "catalog.products";

/// Everything the service needs to start.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Redis connection string for retry counters; in-memory counters when unset.
    pub redis_url: Option<String>,
    /// Kafka bootstrap servers; an in-process log is used when unset.
    pub kafka_brokers: Option<String>,
    /// Topic product integration events are published to and projected from.
    pub product_topic: String,
    /// OTLP collector endpoint; spans are only exported when set.
    pub otlp_endpoint: Option<String>,
    /// Consumer runtime settings.
    pub consumer: ConsumerConfig,
}

impl ServiceConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `DATABASE_URL` is missing or a value
    /// cannot be parsed, and `AppError::Consumer` for invalid consumer
    /// settings.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`ServiceConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or_else(|| {
            AppError::Config("DATABASE_URL environment variable must be set".into())
        })?;
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|e| AppError::Config(format!("PORT must be a valid u16: {e}")))?;
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Ok(Self {
            database_url,
            host,
            port,
            redis_url: non_empty("REDIS_URL"),
            kafka_brokers: non_empty("KAFKA_BROKERS"),
            product_topic: non_empty("CATALOG_PRODUCT_TOPIC")
                .unwrap_or_else(|| DEFAULT_PRODUCT_TOPIC.to_string()),
            otlp_endpoint: non_empty("OTEL_EXPORTER_OTLP_ENDPOINT"),
            consumer: ConsumerConfig::from_lookup(&lookup)?,
        })
    }

    /// Socket address the HTTP server binds.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `HOST:PORT` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))
    }
}
