//! Shared attempt counters for the cache-counted retry strategy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::RetryCacheError;

/// Counter store shared by every consumer in a group.
#[async_trait]
pub trait RetryCache: Send + Sync {
    /// Current value of a counter, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<u64>, RetryCacheError>;

    /// Overwrites a counter and refreshes its TTL.
    async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<(), RetryCacheError>;

    /// Atomically adds one to a counter (starting from zero), refreshes its
    /// TTL and returns the new value.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, RetryCacheError>;

    /// Removes a counter. Removing a missing counter is not an error.
    async fn delete(&self, key: &str) -> Result<(), RetryCacheError>;
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, (u64, Instant)>,
    unavailable: bool,
}

impl CacheState {
    fn check(&self) -> Result<(), RetryCacheError> {
        if self.unavailable {
            Err(RetryCacheError::Unavailable("cache marked unavailable".into()))
        } else {
            Ok(())
        }
    }

    fn live(&mut self, key: &str) -> Option<u64> {
        match self.entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Some(*value),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }
}

/// Process-local counter store; increments are atomic under a mutex.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRetryCache {
    state: Arc<Mutex<CacheState>>,
}

impl InMemoryRetryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every call fail as if the backing store were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Number of live counters.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.state()
            .entries
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }

    /// Returns `true` when no live counter exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RetryCache for InMemoryRetryCache {
    async fn get(&self, key: &str) -> Result<Option<u64>, RetryCacheError> {
        let mut state = self.state();
        state.check()?;
        Ok(state.live(key))
    }

    async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<(), RetryCacheError> {
        let mut state = self.state();
        state.check()?;
        state
            .entries
            .insert(key.to_owned(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, RetryCacheError> {
        let mut state = self.state();
        state.check()?;
        let next = state.live(key).unwrap_or(0) + 1;
        state
            .entries
            .insert(key.to_owned(), (next, Instant::now() + ttl));
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<(), RetryCacheError> {
        let mut state = self.state();
        state.check()?;
        state.entries.remove(key);
        Ok(())
    }
}

/// Redis-backed counter store. Increments run as `MULTI / INCR / EXPIRE /
/// EXEC`, so concurrent consumers never lose an update.
#[derive(Clone)]
pub struct RedisRetryCache {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisRetryCache {
    /// Connects to Redis at `url`; every key is stored under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`RetryCacheError::Unavailable`] if the URL is invalid or the
    /// server cannot be reached.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, RetryCacheError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            prefix: prefix.into(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl RetryCache for RedisRetryCache {
    async fn get(&self, key: &str) -> Result<Option<u64>, RetryCacheError> {
        let mut conn = self.conn.clone();
        let value: Option<u64> = conn.get(self.key(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<(), RetryCacheError> {
        let mut conn = self.conn.clone();
        let () = conn.set_ex(self.key(key), value, ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, RetryCacheError> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let seconds = i64::try_from(ttl_secs(ttl)).unwrap_or(i64::MAX);
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(&key, 1)
            .expire(&key, seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn delete(&self, key: &str) -> Result<(), RetryCacheError> {
        let mut conn = self.conn.clone();
        let () = conn.del(self.key(key)).await?;
        Ok(())
    }
}
