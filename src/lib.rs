//! # Routebox - Route-Level Response Caching
//!
//! Routebox sits between a router and its handlers. For routes that declare a
//! public cache directive it replays previously stored responses and, on a miss,
//! captures the handler's output for reuse.
//!
//! ## Request Lifecycle
//! 1. **Lookup** (`on_pre_handler`): resolve the route's policy, derive the cache
//!    key, query the backend. A hit short-circuits the handler.
//! 2. **Store** (`on_pre_response`): re-resolve the policy and, when the response
//!    qualifies, write it to the backend without delaying delivery.
//!
//! Backend failures never change what the client sees; the cache fails open.
//!
//! ## Usage Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use axum::{middleware, routing::get, Router};
//! use routebox::caching::{CacheDirective, CacheManager, CacheMiddleware, RouteCacheSettings};
//! use routebox::gateway::{cache_hooks, Routebox};
//! use routebox::RouteboxConfig;
//!
//! # async fn run() -> routebox::RouteboxResult<()> {
//! let config = RouteboxConfig::default();
//! let manager = Arc::new(CacheManager::from_config(&config).await?);
//! let routebox = Routebox::new(Arc::new(CacheMiddleware::new(config.defaults, manager)?));
//!
//! let cached = routebox.route(RouteCacheSettings::new(
//!     CacheDirective::expires_in(Duration::from_secs(60)),
//! ))?;
//!
//! let app: Router = Router::new()
//!     .route("/articles", get(|| async { "articles" }))
//!     .route_layer(middleware::from_fn_with_state(cached, cache_hooks));
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

/// Error types, configuration and the host-neutral request/response model
pub mod core;

/// Policy resolution, key derivation, backends and the lookup/store interceptors
pub mod caching;

/// axum integration that mounts the interceptors on routes
pub mod gateway;

/// Logging bootstrap
pub mod observability;

pub use core::config::{CacheDefaults, ParseOptions, RouteboxConfig};
pub use core::error::{RouteboxError, RouteboxResult};
pub use core::types::{CacheRequest, CacheResponse, ResponseVariety};
