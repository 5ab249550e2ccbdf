//! axum middleware function and extractors.

use super::RouteCache;
use crate::caching::{LookupOutcome, RequestCacheContext, StoreAdmission};
use crate::core::types::{CacheRequest, CacheResponse, ResponseVariety};
use axum::{
    async_trait,
    body::{to_bytes, Body, Bytes, HttpBody},
    extract::{FromRequestParts, MatchedPath, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures::stream;
use std::convert::Infallible;
use tracing::{debug, warn};

/// Request extension marking the requester as authenticated.
///
/// Insert it from an auth layer that runs before the cache layer; routes with
/// `skip_authenticated` then bypass the cache for those requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authenticated;

/// Handler-side escape hatch.
///
/// ```rust,no_run
/// use routebox::gateway::NoCache;
///
/// async fn handler(cache: NoCache) -> &'static str {
///     cache.nocache();
///     "never stored"
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct NoCache(Option<RequestCacheContext>);

impl NoCache {
    /// Prevent the response of the current request from being stored. A
    /// no-op on routes without an applicable policy.
    pub fn nocache(&self) {
        if let Some(context) = &self.0 {
            context.nocache();
        }
    }

    /// Whether a cache policy applies to the current request
    pub fn is_applicable(&self) -> bool {
        self.0.is_some()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for NoCache
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<NoCache>().cloned().unwrap_or_default())
    }
}

impl IntoResponse for CacheResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers, Body::from(self.body)).into_response()
    }
}

fn cache_request(parts: &Parts) -> CacheRequest {
    let request = CacheRequest::new(parts.method.clone(), parts.uri.clone())
        .with_headers(parts.headers.clone())
        .with_authenticated(parts.extensions.get::<Authenticated>().is_some());

    match parts.extensions.get::<MatchedPath>() {
        Some(path) => request.with_matched_route(path.as_str()),
        None => request,
    }
}

/// Runs the lookup phase before `next` and the store phase after it.
///
/// The response body is read only when the store phase will write it and its
/// size hint fits the route's `max_body_bytes`. Everything else, including
/// streams of unknown length, is forwarded untouched.
pub async fn cache_hooks(
    State(route): State<RouteCache>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let cache_request = cache_request(&parts);
    let middleware = route.middleware();
    let settings = route.settings();

    let context = match middleware.on_pre_handler(&cache_request, settings).await {
        LookupOutcome::Hit { response, context } => {
            middleware.on_pre_response(&cache_request, settings, Some(&context), &response);
            return response.into_response();
        }
        LookupOutcome::NotApplicable => None,
        LookupOutcome::Miss(context) | LookupOutcome::Passthrough(context) => Some(context),
    };

    parts.extensions.insert(NoCache(context.clone()));
    let response = next.run(Request::from_parts(parts, body)).await;

    let Some(context) = context else {
        return response;
    };

    let (parts, body) = response.into_parts();
    let admission = middleware.admit_response(
        &cache_request,
        settings,
        Some(&context),
        parts.status,
        &parts.headers,
    );
    let limit = match admission {
        StoreAdmission::Buffer { limit } => limit,
        StoreAdmission::Skip(outcome) => {
            debug!(request_id = %cache_request.id, ?outcome, "Store phase finished");
            return Response::from_parts(parts, body);
        }
    };

    let upper = HttpBody::size_hint(&body).upper();
    if !upper.is_some_and(|len| len <= limit as u64) {
        debug!(
            request_id = %cache_request.id,
            ident = context.ident(),
            body_upper_bound = ?upper,
            limit,
            "Response body unbounded or over limit, not caching"
        );
        return Response::from_parts(parts, body);
    }

    let bytes = match to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(
                target: "routebox",
                phase = "store",
                ident = context.ident(),
                error = %e,
                "Failed to buffer response body"
            );
            let failed = stream::once(async move { Err::<Bytes, _>(e) });
            return Response::from_parts(parts, Body::from_stream(failed));
        }
    };

    let snapshot = CacheResponse {
        status: parts.status,
        headers: parts.headers.clone(),
        body: bytes.clone(),
        variety: ResponseVariety::Buffer,
    };
    let outcome = middleware.on_pre_response(&cache_request, settings, Some(&context), &snapshot);
    debug!(request_id = %cache_request.id, ?outcome, "Store phase finished");

    Response::from_parts(parts, Body::from(bytes))
}
