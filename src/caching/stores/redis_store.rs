//! # Redis Cache Store
//!
//! Redis-backed store using a multiplexed [`ConnectionManager`]. Keys are laid
//! out as `{key_prefix}{segment}:{id}` and written with millisecond TTLs.

use super::{CacheKey, CacheStore};
use crate::caching::{CacheError, CacheResult};
use async_trait::async_trait;
use futures::future::BoxFuture;
use redis::{aio::ConnectionManager, Client, RedisResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Redis cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisCacheConfig {
    /// Redis connection URL
    pub url: String,

    /// Key prefix for all cache entries
    pub key_prefix: String,

    /// Maximum number of retries per operation
    pub max_retries: u32,

    /// Base retry delay, multiplied by the attempt number
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "routebox:".to_string(),
            max_retries: 2,
            retry_delay: Duration::from_millis(50),
        }
    }
}

fn redis_key(prefix: &str, key: &CacheKey) -> String {
    format!("{}{}:{}", prefix, key.segment, key.id)
}

/// Redis cache implementation
pub struct RedisCache {
    config: RedisCacheConfig,
    connection_manager: RwLock<ConnectionManager>,
}

impl RedisCache {
    /// Connect to Redis
    pub async fn new(config: RedisCacheConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.as_str())?;
        let connection_manager = ConnectionManager::new(client).await?;

        info!("Redis cache connected to {}", config.url);

        Ok(Self {
            config,
            connection_manager: RwLock::new(connection_manager),
        })
    }

    fn full_key(&self, key: &CacheKey) -> String {
        redis_key(&self.config.key_prefix, key)
    }

    /// Execute a Redis operation with retry logic. The connection manager is
    /// multiplexed, so each attempt works on its own clone.
    async fn execute_with_retry<F, T>(&self, operation: F) -> CacheResult<T>
    where
        F: Fn(ConnectionManager) -> BoxFuture<'static, RedisResult<T>> + Send + Sync,
        T: Send,
    {
        let mut retries = 0;

        loop {
            let conn = self.connection_manager.read().await.clone();

            match operation(conn).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    error!("Redis operation failed: {}", e);

                    if retries >= self.config.max_retries {
                        return Err(CacheError::Redis(e));
                    }

                    retries += 1;
                    tokio::time::sleep(self.config.retry_delay * retries).await;

                    if let Err(reconnect_err) = self.reconnect().await {
                        warn!("Failed to reconnect to Redis: {}", reconnect_err);
                    }
                }
            }
        }
    }

    async fn reconnect(&self) -> CacheResult<()> {
        let client = Client::open(self.config.url.as_str())?;
        let new_connection_manager = ConnectionManager::new(client).await?;

        let mut conn = self.connection_manager.write().await;
        *conn = new_connection_manager;

        info!("Reconnected to Redis");
        Ok(())
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    fn kind(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Vec<u8>>> {
        let full_key = self.full_key(key);

        let value = self
            .execute_with_retry(|mut conn| {
                let full_key = full_key.clone();
                Box::pin(async move {
                    redis::cmd("GET")
                        .arg(&full_key)
                        .query_async::<_, Option<Vec<u8>>>(&mut conn)
                        .await
                })
            })
            .await?;

        debug!(hit = value.is_some(), "Redis cache lookup for key: {}", key);
        Ok(value)
    }

    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let full_key = self.full_key(key);
        // PX rejects zero.
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let value = value.to_vec();

        self.execute_with_retry(|mut conn| {
            let full_key = full_key.clone();
            let value = value.clone();
            Box::pin(async move {
                redis::cmd("SET")
                    .arg(&full_key)
                    .arg(value)
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async::<_, ()>(&mut conn)
                    .await
            })
        })
        .await?;

        debug!("Set Redis cache key: {} with TTL: {:?}", key, ttl);
        Ok(())
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let pong: String = self
            .execute_with_retry(|mut conn| {
                Box::pin(async move {
                    redis::cmd("PING")
                        .query_async::<_, String>(&mut conn)
                        .await
                })
            })
            .await?;

        Ok(pong == "PONG")
    }
}
