//! # Caching Module
//!
//! Per-route response caching driven by two interceptors:
//!
//! 1. **Lookup** ([`CacheMiddleware::on_pre_handler`]) resolves the route's
//!    [`RoutePolicy`], derives the [`CacheKey`] and replays a stored response
//!    when one exists.
//! 2. **Store** ([`CacheMiddleware::on_pre_response`]) persists the handler's
//!    response for reuse, off the response path.
//!
//! The [`RequestCacheContext`] returned by the lookup is the only state shared
//! between the two phases.
//!
//! ## Layout
//! - [`policy`]: directive + overrides + defaults merged into a policy
//! - [`key_generator`]: request ident digests and segment-scoped keys
//! - [`cache_manager`]: named backends and shared policy handles
//! - [`stores`]: the backend adapter trait with memory and Redis stores
//! - [`hooks`]: hit/miss callbacks
//! - [`context`]: per-request state and the escape hatch

pub mod cache_manager;
pub mod context;
pub mod hooks;
pub mod key_generator;
pub mod middleware;
pub mod policy;
pub mod stores;

pub use cache_manager::{CacheManager, PolicyCache, PolicySpec};
pub use context::RequestCacheContext;
pub use hooks::{CacheCallbacks, CacheHook};
pub use key_generator::{build_cache_key, build_ident, CacheKey, DigestAlgorithm};
pub use middleware::{CacheMiddleware, LookupOutcome, StoreAdmission, StoreOutcome};
pub use policy::{
    resolve, CacheDirective, ParseOverrides, Privacy, RouteCacheSettings, RouteOverrides,
    RoutePolicy,
};
pub use stores::{
    CachedEntry, CacheStore, InMemoryCache, InMemoryCacheConfig, RedisCache, RedisCacheConfig,
};

use thiserror::Error;

/// Cache operation result type
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-related errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache store error: {message}")]
    Store { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache operation timeout")]
    Timeout,

    #[error("Cache unavailable")]
    Unavailable,

    #[error("Unknown cache backend '{name}'")]
    UnknownBackend { name: String },
}
