//! Per-request cache state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::cache_manager::PolicyCache;
use super::key_generator::CacheKey;

struct ContextInner {
    ident: String,
    key: CacheKey,
    cache: Arc<PolicyCache>,
    suppressed: AtomicBool,
    hit_served: AtomicBool,
}

/// State created by the lookup phase and consumed by the store phase.
///
/// Clones share the same flags, so a copy handed to handler code can suppress
/// storage for the original.
#[derive(Clone)]
pub struct RequestCacheContext {
    inner: Arc<ContextInner>,
}

impl RequestCacheContext {
    pub fn new(ident: String, key: CacheKey, cache: Arc<PolicyCache>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                ident,
                key,
                cache,
                suppressed: AtomicBool::new(false),
                hit_served: AtomicBool::new(false),
            }),
        }
    }

    pub fn ident(&self) -> &str {
        &self.inner.ident
    }

    pub fn key(&self) -> &CacheKey {
        &self.inner.key
    }

    pub fn cache(&self) -> &Arc<PolicyCache> {
        &self.inner.cache
    }

    /// Opt this request out of caching. Safe to call repeatedly.
    pub fn nocache(&self) {
        self.inner.suppressed.store(true, Ordering::SeqCst);
    }

    pub fn is_suppressed(&self) -> bool {
        self.inner.suppressed.load(Ordering::SeqCst)
    }

    /// Record that the hit callback fired. Returns whether it had already.
    pub fn mark_hit_served(&self) -> bool {
        self.inner.hit_served.swap(true, Ordering::SeqCst)
    }

    pub fn hit_served(&self) -> bool {
        self.inner.hit_served.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for RequestCacheContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCacheContext")
            .field("ident", &self.inner.ident)
            .field("key", &self.inner.key)
            .field("suppressed", &self.is_suppressed())
            .field("hit_served", &self.hit_served())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::cache_manager::{CacheManager, PolicySpec};
    use crate::caching::stores::{InMemoryCache, InMemoryCacheConfig};
    use std::time::Duration;

    fn context() -> RequestCacheContext {
        let manager = CacheManager::new(Duration::from_secs(1));
        manager.register_store(
            "_default",
            Arc::new(InMemoryCache::new(InMemoryCacheConfig::default())),
        );
        let cache = manager
            .policy(PolicySpec {
                backend: "_default".to_string(),
                segment: "routebox".to_string(),
                expires_in: Some(Duration::from_secs(1)),
                expires_at: None,
                shared: true,
            })
            .unwrap();
        let key = CacheKey {
            id: "42".to_string(),
            segment: "routebox".to_string(),
        };
        RequestCacheContext::new("42".to_string(), key, cache)
    }

    #[tokio::test]
    async fn test_nocache_is_shared_and_idempotent() {
        let ctx = context();
        let handed_to_handler = ctx.clone();

        assert!(!ctx.is_suppressed());
        handed_to_handler.nocache();
        handed_to_handler.nocache();
        assert!(ctx.is_suppressed());
    }

    #[tokio::test]
    async fn test_hit_served_flips_once() {
        let ctx = context();
        assert!(!ctx.mark_hit_served());
        assert!(ctx.mark_hit_served());
        assert!(ctx.hit_served());
    }
}
