//! # Cache Manager
//!
//! Holds the named backend instances and hands out [`PolicyCache`] handles:
//! a backend bound to one segment and one expiry rule. Handles requested with
//! `shared = true` are reused for every policy with the same parameters, so
//! concurrently resolved routes share one handle instead of building their own.

use super::key_generator::CacheKey;
use super::stores::{CacheStore, CachedEntry, InMemoryCache, RedisCache};
use super::{CacheError, CacheResult};
use crate::core::config::{BackendKind, RouteboxConfig};
use chrono::{DateTime, NaiveTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Parameters identifying a backend handle
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolicySpec {
    pub backend: String,
    pub segment: String,
    pub expires_in: Option<Duration>,
    pub expires_at: Option<NaiveTime>,
    pub shared: bool,
}

/// A backend bound to a segment and an expiry rule
pub struct PolicyCache {
    spec: PolicySpec,
    store: Arc<dyn CacheStore>,
    operation_timeout: Duration,
}

impl PolicyCache {
    pub fn spec(&self) -> &PolicySpec {
        &self.spec
    }

    pub fn segment(&self) -> &str {
        &self.spec.segment
    }

    /// Lifetime for an entry written now
    pub fn ttl(&self) -> Duration {
        self.ttl_at(Utc::now())
    }

    /// Lifetime for an entry written at `now`. `expires_in` wins when both
    /// rules are present.
    pub fn ttl_at(&self, now: DateTime<Utc>) -> Duration {
        if let Some(expires_in) = self.spec.expires_in {
            return expires_in;
        }

        match self.spec.expires_at {
            Some(expires_at) => {
                let today = now.date_naive().and_time(expires_at).and_utc();
                let target = if today <= now {
                    today + chrono::Duration::days(1)
                } else {
                    today
                };
                (target - now).to_std().unwrap_or_default()
            }
            None => Duration::ZERO,
        }
    }

    /// Fetch and decode the entry stored under `key`
    pub async fn get(&self, key: &CacheKey) -> CacheResult<Option<CachedEntry>> {
        let raw = tokio::time::timeout(self.operation_timeout, self.store.get(key))
            .await
            .map_err(|_| CacheError::Timeout)??;

        raw.map(|bytes| CachedEntry::from_bytes(&bytes)).transpose()
    }

    /// Encode and store `entry` under `key`
    pub async fn set(
        &self,
        key: &CacheKey,
        entry: &CachedEntry,
        ttl: Duration,
    ) -> CacheResult<()> {
        let bytes = entry.to_bytes()?;

        tokio::time::timeout(self.operation_timeout, self.store.set(key, &bytes, ttl))
            .await
            .map_err(|_| CacheError::Timeout)?
    }

    pub fn store_kind(&self) -> &'static str {
        self.store.kind()
    }
}

/// Registry of named backends and shared policy handles
pub struct CacheManager {
    stores: DashMap<String, Arc<dyn CacheStore>>,
    policies: DashMap<PolicySpec, Arc<PolicyCache>>,
    operation_timeout: Duration,
}

impl CacheManager {
    /// Create an empty manager
    pub fn new(operation_timeout: Duration) -> Self {
        Self {
            stores: DashMap::new(),
            policies: DashMap::new(),
            operation_timeout,
        }
    }

    /// Build every backend declared in `config`
    pub async fn from_config(config: &RouteboxConfig) -> CacheResult<Self> {
        let manager = Self::new(config.operation_timeout);

        for backend in &config.backends {
            let store: Arc<dyn CacheStore> = match &backend.kind {
                BackendKind::Memory(memory) => Arc::new(InMemoryCache::new(memory.clone())),
                BackendKind::Redis(redis) => Arc::new(RedisCache::new(redis.clone()).await?),
            };
            info!(backend = %backend.name, kind = store.kind(), "Registered cache backend");
            manager.check_store(&backend.name, store.as_ref()).await;
            manager.register_store(backend.name.clone(), store);
        }

        Ok(manager)
    }

    /// Run the backend's health check once. An unhealthy backend is still
    /// registered; requests against it fail open.
    pub async fn check_store(&self, name: &str, store: &dyn CacheStore) -> bool {
        let result = tokio::time::timeout(self.operation_timeout, store.health_check()).await;

        match result {
            Ok(Ok(true)) => {
                debug!(backend = %name, kind = store.kind(), "Cache backend healthy");
                true
            }
            Ok(Ok(false)) => {
                warn!(target: "routebox", backend = %name, "Cache backend reported unhealthy");
                false
            }
            Ok(Err(e)) => {
                warn!(
                    target: "routebox",
                    backend = %name,
                    error = %e,
                    "Cache backend health check failed"
                );
                false
            }
            Err(_) => {
                warn!(target: "routebox", backend = %name, "Cache backend health check timed out");
                false
            }
        }
    }

    /// Register (or replace) a named backend
    pub fn register_store<S: Into<String>>(&self, name: S, store: Arc<dyn CacheStore>) {
        self.stores.insert(name.into(), store);
    }

    pub fn has_store(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    pub fn store(&self, name: &str) -> Option<Arc<dyn CacheStore>> {
        self.stores.get(name).map(|store| store.value().clone())
    }

    /// Get a handle for `spec`, reusing an existing one when `spec.shared`
    pub fn policy(&self, spec: PolicySpec) -> CacheResult<Arc<PolicyCache>> {
        let store = self
            .store(&spec.backend)
            .ok_or_else(|| CacheError::UnknownBackend {
                name: spec.backend.clone(),
            })?;

        if !spec.shared {
            return Ok(Arc::new(PolicyCache {
                spec,
                store,
                operation_timeout: self.operation_timeout,
            }));
        }

        let handle = self
            .policies
            .entry(spec.clone())
            .or_insert_with(|| {
                debug!(
                    segment = %spec.segment,
                    backend = %spec.backend,
                    "Created shared policy handle"
                );
                Arc::new(PolicyCache {
                    spec,
                    store,
                    operation_timeout: self.operation_timeout,
                })
            })
            .clone();

        Ok(handle)
    }
}
