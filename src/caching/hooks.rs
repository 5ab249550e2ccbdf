//! Hit/miss callbacks invoked by the interceptors.

use std::fmt;
use std::sync::Arc;

use crate::core::types::{CacheRequest, CacheResponse};

/// A callback receiving the request/response pair of a cache event
pub type CacheHook = Arc<dyn Fn(&CacheRequest, &CacheResponse) + Send + Sync>;

/// The pair of hooks a policy carries. Overriding them per route replaces both.
#[derive(Clone)]
pub struct CacheCallbacks {
    /// Fired once per request served from cache
    pub on_cache_hit: CacheHook,

    /// Fired once per response handed to the backend for storage
    pub on_cache_miss: CacheHook,
}

impl CacheCallbacks {
    pub fn new<H, M>(on_cache_hit: H, on_cache_miss: M) -> Self
    where
        H: Fn(&CacheRequest, &CacheResponse) + Send + Sync + 'static,
        M: Fn(&CacheRequest, &CacheResponse) + Send + Sync + 'static,
    {
        Self {
            on_cache_hit: Arc::new(on_cache_hit),
            on_cache_miss: Arc::new(on_cache_miss),
        }
    }

    pub fn with_on_cache_hit<H>(mut self, hook: H) -> Self
    where
        H: Fn(&CacheRequest, &CacheResponse) + Send + Sync + 'static,
    {
        self.on_cache_hit = Arc::new(hook);
        self
    }

    pub fn with_on_cache_miss<M>(mut self, hook: M) -> Self
    where
        M: Fn(&CacheRequest, &CacheResponse) + Send + Sync + 'static,
    {
        self.on_cache_miss = Arc::new(hook);
        self
    }

    pub(crate) fn cache_hit(&self, request: &CacheRequest, response: &CacheResponse) {
        (self.on_cache_hit)(request, response);
    }

    pub(crate) fn cache_miss(&self, request: &CacheRequest, response: &CacheResponse) {
        (self.on_cache_miss)(request, response);
    }
}

impl Default for CacheCallbacks {
    fn default() -> Self {
        Self::new(|_, _| {}, |_, _| {})
    }
}

impl fmt::Debug for CacheCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheCallbacks").finish_non_exhaustive()
    }
}
