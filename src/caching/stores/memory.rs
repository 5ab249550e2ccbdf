//! # In-Memory Cache Store
//!
//! Process-local store with per-entry deadlines and a background sweep of
//! expired entries. When the configured capacity is reached, writes of new
//! keys are rejected until expired entries free up room; routebox treats that
//! like any other write failure and simply does not cache.

use super::{CacheKey, CacheStore};
use crate::caching::{CacheError, CacheResult};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::debug;

/// In-memory cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryCacheConfig {
    /// Maximum number of entries
    pub max_entries: usize,

    /// Cleanup interval for expired entries
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10000,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: Vec<u8>,
    deadline: Instant,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// In-memory cache implementation
pub struct InMemoryCache {
    config: InMemoryCacheConfig,
    entries: Arc<DashMap<CacheKey, StoredValue>>,
    /// Serialises inserts of new keys so the capacity check holds
    insert_lock: Mutex<()>,
    cleanup_task: JoinHandle<()>,
}

impl InMemoryCache {
    /// Create a new in-memory cache. Must be called inside a tokio runtime.
    pub fn new(config: InMemoryCacheConfig) -> Self {
        let entries = Arc::new(DashMap::new());

        let cleanup_task = {
            let entries = entries.clone();
            let cleanup_interval = config.cleanup_interval;

            tokio::spawn(async move {
                let mut interval = interval(cleanup_interval);
                loop {
                    interval.tick().await;
                    Self::cleanup_expired_entries(&entries);
                }
            })
        };

        Self {
            config,
            entries,
            insert_lock: Mutex::new(()),
            cleanup_task,
        }
    }

    /// Number of entries currently held, expired or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn cleanup_expired_entries(entries: &DashMap<CacheKey, StoredValue>) -> usize {
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, stored| !stored.is_expired(now));
        let cleaned = before.saturating_sub(entries.len());

        if cleaned > 0 {
            debug!("Cleaned up {} expired cache entries", cleaned);
        }
        cleaned
    }

    pub fn delete(&self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    fn insert_new(&self, key: &CacheKey, stored: StoredValue) -> CacheResult<()> {
        let _guard = self.insert_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if !self.entries.contains_key(key) && self.entries.len() >= self.config.max_entries {
            Self::cleanup_expired_entries(&self.entries);

            if self.entries.len() >= self.config.max_entries {
                return Err(CacheError::Store {
                    message: format!(
                        "in-memory cache is full ({} entries)",
                        self.config.max_entries
                    ),
                });
            }
        }

        self.entries.insert(key.clone(), stored);
        Ok(())
    }
}

impl Drop for InMemoryCache {
    fn drop(&mut self) {
        self.cleanup_task.abort();
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Vec<u8>>> {
        let now = Instant::now();

        let expired = match self.entries.get(key) {
            Some(stored) if !stored.is_expired(now) => return Ok(Some(stored.value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(key, |_, stored| stored.is_expired(now));
        }
        Ok(None)
    }

    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let stored = StoredValue {
            value: value.to_vec(),
            deadline: Instant::now() + ttl,
        };

        // Overwriting an existing key never needs room.
        match self.entries.get_mut(key) {
            Some(mut existing) => {
                *existing = stored;
                Ok(())
            }
            None => self.insert_new(key, stored),
        }
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let key = CacheKey {
            id: "__health_check__".to_string(),
            segment: "__routebox__".to_string(),
        };
        let value = b"health_check_value";

        self.set(&key, value, Duration::from_secs(1)).await?;
        let retrieved = self.get(&key).await?;
        self.delete(&key);

        Ok(retrieved.as_deref() == Some(value.as_slice()))
    }
}
