//! # Cache Stores Module
//!
//! The backend adapter seam. A [`CacheStore`] is an external keyed store with
//! TTL support; routebox hands it opaque bytes under a segment-scoped
//! [`CacheKey`] and never relies on it for anything beyond get/set semantics.
//! Eviction and persistence are the store's own business.

pub mod memory;
pub mod redis_store;

pub use memory::{InMemoryCache, InMemoryCacheConfig};
pub use redis_store::{RedisCache, RedisCacheConfig};

use super::key_generator::CacheKey;
use super::CacheResult;
use crate::core::types::{CacheResponse, ResponseVariety};
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Trait for cache store implementations
///
/// Implementations must be safe for concurrent use; callers never serialise
/// access to a store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short identifier used in log fields
    fn kind(&self) -> &'static str;

    /// Get a value from the cache
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Vec<u8>>>;

    /// Set a value in the cache with TTL
    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Round-trip check, run once when the backend is built from config
    async fn health_check(&self) -> CacheResult<bool>;
}

/// Snapshot of a handler response as persisted in a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    #[serde(with = "base64_body")]
    pub source: Vec<u8>,
    pub variety: ResponseVariety,
}

impl CachedEntry {
    /// Capture the parts of `response` worth replaying. Header values that are
    /// not valid UTF-8 are dropped.
    pub fn from_response(response: &CacheResponse) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();

        Self {
            status_code: response.status.as_u16(),
            headers,
            source: response.body.to_vec(),
            variety: response.variety,
        }
    }

    /// Rebuild a response. Returns `None` if the stored status is out of range.
    pub fn into_response(self) -> Option<CacheResponse> {
        let status = StatusCode::from_u16(self.status_code).ok()?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (
                name.parse::<HeaderName>(),
                HeaderValue::from_str(&value),
            ) {
                headers.insert(name, value);
            }
        }

        Some(CacheResponse {
            status,
            headers,
            body: self.source.into(),
            variety: self.variety,
        })
    }

    pub fn to_bytes(&self) -> CacheResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> CacheResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
