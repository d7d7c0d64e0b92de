//! Redis-backed distributed tier for `permaccel`.
//!
//! Wraps a `deadpool-redis` pool behind [`DistributedCache`]. Every Redis
//! failure (pool exhausted, connection refused, command error, timeout) is
//! reported as a [`CacheError`]; the engine turns those into misses.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use permaccel::{AccelError, AccelResult, CacheError, DistributedCache};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

/// Connection settings for the Redis tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Pool wait/create/recycle timeout, also applied to each command
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            timeout: Duration::from_millis(500),
        }
    }
}

impl RedisConfig {
    /// Build the pool and check that a connection can be obtained.
    pub async fn connect(&self) -> AccelResult<RedisDistributedCache> {
        tracing::info!(url = %self.url, "Connecting to Redis");

        let mut redis_config = deadpool_redis::Config::from_url(&self.url);
        let mut pool_config = deadpool_redis::PoolConfig::new(self.pool_size);
        pool_config.timeouts.wait = Some(self.timeout);
        pool_config.timeouts.create = Some(self.timeout);
        pool_config.timeouts.recycle = Some(self.timeout);
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| AccelError::Cache(CacheError::unavailable(e.to_string())))?;

        if let Err(e) = pool.get().await {
            tracing::warn!(url = %self.url, error = %e, "Redis connection check failed");
            return Err(AccelError::Cache(CacheError::unavailable(e.to_string())));
        }

        tracing::info!("Connected to Redis");
        Ok(RedisDistributedCache::new(pool, self.timeout))
    }
}

/// [`DistributedCache`] over a Redis pool.
#[derive(Clone)]
pub struct RedisDistributedCache {
    pool: Pool,
    timeout: Duration,
}

impl RedisDistributedCache {
    pub fn new(pool: Pool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::unavailable(e.to_string()))
    }

    /// Run a command future under the configured timeout.
    async fn bounded<T, F>(&self, key: &str, command: F) -> Result<T, CacheError>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, command).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::backend(e.to_string())),
            Err(_) => Err(CacheError::timeout(key)),
        }
    }
}

/// Redis TTLs are whole seconds; anything shorter is rounded up to one.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl DistributedCache for RedisDistributedCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection().await?;
        self.bounded(key, conn.get::<_, Option<Vec<u8>>>(key)).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        self.bounded(key, conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl)))
            .await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        self.bounded(key, conn.del::<_, ()>(key)).await
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;
        self.bounded(key, conn.exists::<_, bool>(key)).await
    }
}
