//! # Cache Middleware
//!
//! The two interceptors that wrap a route handler. Both are host-neutral: they
//! take [`CacheRequest`]/[`CacheResponse`] views and report what they decided,
//! leaving it to the integration layer to short-circuit or forward.
//!
//! Backend failures are logged under the `routebox` target and otherwise
//! ignored. A request never fails because the cache did.

use super::cache_manager::CacheManager;
use super::context::RequestCacheContext;
use super::key_generator::{build_cache_key, build_ident};
use super::policy::{resolve, RouteCacheSettings, RoutePolicy};
use super::stores::CachedEntry;
use crate::core::config::{into_result, CacheDefaults};
use crate::core::error::{RouteboxError, RouteboxResult};
use crate::core::types::{CacheRequest, CacheResponse};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Result of the lookup phase
#[derive(Debug)]
pub enum LookupOutcome {
    /// No policy applies; the request proceeds untouched
    NotApplicable,

    /// A stored response was found and should be sent instead of the handler's
    Hit {
        response: CacheResponse,
        context: RequestCacheContext,
    },

    /// Nothing stored yet; the store phase will persist the handler's response
    Miss(RequestCacheContext),

    /// The backend failed; treated as a miss
    Passthrough(RequestCacheContext),
}

impl LookupOutcome {
    pub fn context(&self) -> Option<&RequestCacheContext> {
        match self {
            Self::NotApplicable => None,
            Self::Hit { context, .. } | Self::Miss(context) | Self::Passthrough(context) => {
                Some(context)
            }
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit { .. })
    }
}

/// Result of the store phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    NotApplicable,
    Suppressed,
    /// The response was itself served from cache
    AlreadyCached,
    UncacheableStatus(StatusCode),
    /// The policy yields no remaining lifetime
    Expired,
    /// A background write was issued
    Stored,
}

/// What the store phase needs before the host reads the response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAdmission {
    /// The response will not be stored; forward it untouched
    Skip(StoreOutcome),

    /// Buffer the body if it is known to fit in `limit` bytes, then run
    /// [`CacheMiddleware::on_pre_response`]
    Buffer { limit: usize },
}

/// Lookup and store interceptors bound to the global defaults
pub struct CacheMiddleware {
    defaults: Arc<CacheDefaults>,
    cache_manager: Arc<CacheManager>,
    writes: TaskTracker,
}

impl CacheMiddleware {
    /// Validate the defaults against the registered backends
    pub fn new(defaults: CacheDefaults, cache_manager: Arc<CacheManager>) -> RouteboxResult<Self> {
        let mut errors = Vec::new();
        defaults.collect_errors(&mut errors);
        if !defaults.backend.trim().is_empty() && !cache_manager.has_store(&defaults.backend) {
            errors.push(format!("cache backend '{}' is not registered", defaults.backend));
        }
        into_result(errors)?;

        Ok(Self {
            defaults: Arc::new(defaults),
            cache_manager,
            writes: TaskTracker::new(),
        })
    }

    pub fn defaults(&self) -> &CacheDefaults {
        &self.defaults
    }

    pub fn cache_manager(&self) -> &Arc<CacheManager> {
        &self.cache_manager
    }

    /// Reject route settings that could never resolve to a usable policy
    pub fn validate_route(&self, settings: &RouteCacheSettings) -> RouteboxResult<()> {
        let mut errors = Vec::new();
        settings.overrides.collect_errors(&mut errors);

        if let Some(backend) = &settings.overrides.backend {
            if !backend.trim().is_empty() && !self.cache_manager.has_store(backend) {
                errors.push(format!("cache backend '{}' is not registered", backend));
            }
        }

        into_result(errors)
    }

    pub fn resolve(&self, settings: &RouteCacheSettings) -> Option<RoutePolicy> {
        resolve(&settings.directive, &settings.overrides, &self.defaults)
    }

    fn applicable_policy(
        &self,
        request: &CacheRequest,
        settings: &RouteCacheSettings,
    ) -> Option<RoutePolicy> {
        let policy = self.resolve(settings)?;

        if policy.skip_authenticated && request.authenticated {
            debug!(request_id = %request.id, "Skipping cache for authenticated request");
            return None;
        }

        Some(policy)
    }

    /// Lookup phase, run before the handler
    pub async fn on_pre_handler(
        &self,
        request: &CacheRequest,
        settings: &RouteCacheSettings,
    ) -> LookupOutcome {
        let Some(policy) = self.applicable_policy(request, settings) else {
            return LookupOutcome::NotApplicable;
        };

        let cache = match self.cache_manager.policy(policy.policy_spec()) {
            Ok(cache) => cache,
            Err(e) => {
                let err = RouteboxError::BackendRead(e);
                warn!(
                    target: "routebox",
                    phase = "lookup",
                    error_type = err.error_type(),
                    error = %err,
                    "Cache backend unavailable for route"
                );
                return LookupOutcome::NotApplicable;
            }
        };

        let ident = build_ident(request, &policy.parse, policy.digest);
        let key = build_cache_key(&ident, &policy.segment);
        let context = RequestCacheContext::new(ident, key, cache);

        match context.cache().get(context.key()).await {
            Ok(Some(entry)) => match entry.into_response() {
                Some(mut response) => {
                    let marker = HeaderValue::from_static("true");
                    response.headers.insert(policy.was_cached_header.clone(), marker);
                    context.mark_hit_served();
                    policy.callbacks.cache_hit(request, &response);

                    debug!(
                        request_id = %request.id,
                        route = request.matched_route.as_deref(),
                        segment = %policy.segment,
                        ident = context.ident(),
                        "Cache hit"
                    );
                    LookupOutcome::Hit { response, context }
                }
                None => {
                    warn!(
                        target: "routebox",
                        phase = "lookup",
                        segment = %policy.segment,
                        ident = context.ident(),
                        "Discarding stored entry with invalid status"
                    );
                    LookupOutcome::Passthrough(context)
                }
            },
            Ok(None) => {
                debug!(
                    request_id = %request.id,
                    route = request.matched_route.as_deref(),
                    segment = %policy.segment,
                    ident = context.ident(),
                    "Cache miss"
                );
                LookupOutcome::Miss(context)
            }
            Err(e) => {
                let err = RouteboxError::BackendRead(e);
                warn!(
                    target: "routebox",
                    phase = "lookup",
                    error_type = err.error_type(),
                    segment = %policy.segment,
                    ident = context.ident(),
                    error = %err,
                    "Cache lookup failed"
                );
                LookupOutcome::Passthrough(context)
            }
        }
    }

    /// Checks that need only the request and its cache context
    fn admitted<'a>(
        &self,
        request: &CacheRequest,
        settings: &RouteCacheSettings,
        context: Option<&'a RequestCacheContext>,
    ) -> Result<(RoutePolicy, &'a RequestCacheContext), StoreOutcome> {
        let policy = self
            .applicable_policy(request, settings)
            .ok_or(StoreOutcome::NotApplicable)?;
        let context = context.ok_or(StoreOutcome::NotApplicable)?;

        if context.is_suppressed() {
            debug!(
                request_id = %request.id,
                ident = context.ident(),
                "Caching suppressed by handler"
            );
            return Err(StoreOutcome::Suppressed);
        }

        Ok((policy, context))
    }

    /// Checks on the response head. `None` means the response should be stored.
    fn gate(
        request: &CacheRequest,
        policy: &RoutePolicy,
        context: &RequestCacheContext,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> Option<StoreOutcome> {
        if headers.contains_key(&policy.was_cached_header) {
            return Some(StoreOutcome::AlreadyCached);
        }

        if !policy.is_cacheable_status(status.as_u16()) {
            debug!(
                request_id = %request.id,
                status = status.as_u16(),
                "Response status not cacheable"
            );
            return Some(StoreOutcome::UncacheableStatus(status));
        }

        if context.cache().ttl().is_zero() {
            return Some(StoreOutcome::Expired);
        }

        None
    }

    /// Decide from the response head alone whether the store phase needs the
    /// body. Hosts call this before buffering so that responses which will
    /// never be stored keep streaming.
    pub fn admit_response(
        &self,
        request: &CacheRequest,
        settings: &RouteCacheSettings,
        context: Option<&RequestCacheContext>,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> StoreAdmission {
        let (policy, context) = match self.admitted(request, settings, context) {
            Ok(admitted) => admitted,
            Err(outcome) => return StoreAdmission::Skip(outcome),
        };

        match Self::gate(request, &policy, context, status, headers) {
            // the hit callback still has to see the body
            Some(StoreOutcome::AlreadyCached) if !context.hit_served() => StoreAdmission::Buffer {
                limit: policy.max_body_bytes,
            },
            Some(outcome) => StoreAdmission::Skip(outcome),
            None => StoreAdmission::Buffer {
                limit: policy.max_body_bytes,
            },
        }
    }

    /// Store phase, run after the handler produced `response`
    pub fn on_pre_response(
        &self,
        request: &CacheRequest,
        settings: &RouteCacheSettings,
        context: Option<&RequestCacheContext>,
        response: &CacheResponse,
    ) -> StoreOutcome {
        let (policy, context) = match self.admitted(request, settings, context) {
            Ok(admitted) => admitted,
            Err(outcome) => return outcome,
        };

        let gated = Self::gate(request, &policy, context, response.status, &response.headers);
        if let Some(outcome) = gated {
            if outcome == StoreOutcome::AlreadyCached && !context.mark_hit_served() {
                policy.callbacks.cache_hit(request, response);
            }
            return outcome;
        }

        let ttl = context.cache().ttl();
        let entry = CachedEntry::from_response(response);
        let cache = context.cache().clone();
        let key = context.key().clone();
        let ident = context.ident().to_string();

        self.writes.spawn(async move {
            match cache.set(&key, &entry, ttl).await {
                Ok(()) => debug!(segment = %key.segment, ident = %ident, ?ttl, "Stored response"),
                Err(e) => {
                    let err = RouteboxError::BackendWrite(e);
                    warn!(
                        target: "routebox",
                        phase = "store",
                        error_type = err.error_type(),
                        segment = %key.segment,
                        ident = %ident,
                        error = %err,
                        "Cache write failed"
                    );
                }
            }
        });

        policy.callbacks.cache_miss(request, response);
        StoreOutcome::Stored
    }

    /// Wait for every write issued so far
    pub async fn flush(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }
}
