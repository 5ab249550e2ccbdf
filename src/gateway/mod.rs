//! # Gateway Integration
//!
//! Mounts the caching interceptors on axum routes. A [`Routebox`] owns the
//! shared [`CacheMiddleware`]; each cached route gets a [`RouteCache`] state
//! carrying its own settings, which [`cache_hooks`] consumes through
//! `axum::middleware::from_fn_with_state`.

pub mod layer;

pub use layer::{cache_hooks, Authenticated, NoCache};

use crate::caching::{CacheMiddleware, RouteCacheSettings};
use crate::core::error::RouteboxResult;
use std::sync::Arc;

/// Entry point for registering cached routes
#[derive(Clone)]
pub struct Routebox {
    middleware: Arc<CacheMiddleware>,
}

impl Routebox {
    pub fn new(middleware: Arc<CacheMiddleware>) -> Self {
        Self { middleware }
    }

    pub fn middleware(&self) -> &Arc<CacheMiddleware> {
        &self.middleware
    }

    /// Validate `settings` and bind them to a route state.
    ///
    /// Fails when the overrides are malformed or name a backend that was never
    /// registered, so a bad route is caught before the server starts.
    pub fn route(&self, settings: RouteCacheSettings) -> RouteboxResult<RouteCache> {
        self.middleware.validate_route(&settings)?;

        Ok(RouteCache {
            middleware: self.middleware.clone(),
            settings: Arc::new(settings),
        })
    }

    /// Wait for pending background writes
    pub async fn flush(&self) {
        self.middleware.flush().await;
    }
}

/// Per-route state for [`cache_hooks`]
#[derive(Clone)]
pub struct RouteCache {
    middleware: Arc<CacheMiddleware>,
    settings: Arc<RouteCacheSettings>,
}

impl RouteCache {
    pub fn middleware(&self) -> &CacheMiddleware {
        &self.middleware
    }

    pub fn settings(&self) -> &RouteCacheSettings {
        &self.settings
    }
}
