//! # Caching Integration Tests
//!
//! Drives axum routers wrapped in the cache layer end to end.

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body, Bytes, HttpBody},
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use routebox::caching::{
    CacheCallbacks, CacheDirective, CacheError, CacheKey, CacheManager, CacheMiddleware,
    CacheResult, CacheStore, InMemoryCache, InMemoryCacheConfig, Privacy, RouteCacheSettings,
    RouteOverrides,
};
use routebox::gateway::{cache_hooks, Authenticated, NoCache, RouteCache, Routebox};
use routebox::{CacheDefaults, CacheRequest, CacheResponse};
use http_body::{Frame, SizeHint};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::sleep;
use tower::ServiceExt;

struct FailingStore;

#[async_trait]
impl CacheStore for FailingStore {
    fn kind(&self) -> &'static str {
        "failing"
    }

    async fn get(&self, _key: &CacheKey) -> CacheResult<Option<Vec<u8>>> {
        Err(CacheError::Unavailable)
    }

    async fn set(&self, _key: &CacheKey, _value: &[u8], _ttl: Duration) -> CacheResult<()> {
        Err(CacheError::Unavailable)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(false)
    }
}

fn routebox_with(store: Arc<dyn CacheStore>, defaults: CacheDefaults) -> Routebox {
    let manager = Arc::new(CacheManager::new(Duration::from_millis(200)));
    manager.register_store("_default", store);
    Routebox::new(Arc::new(CacheMiddleware::new(defaults, manager).unwrap()))
}

fn memory_routebox(defaults: CacheDefaults) -> Routebox {
    routebox_with(
        Arc::new(InMemoryCache::new(InMemoryCacheConfig::default())),
        defaults,
    )
}

fn expires_in(ttl: Duration) -> RouteCacheSettings {
    RouteCacheSettings::new(CacheDirective::expires_in(ttl))
}

async fn counter(State(calls): State<Arc<AtomicUsize>>) -> String {
    calls.fetch_add(1, Ordering::SeqCst).to_string()
}

fn counter_app(path: &str, route: RouteCache, calls: Arc<AtomicUsize>) -> Router {
    Router::new()
        .route(path, get(counter))
        .route_layer(middleware::from_fn_with_state(route, cache_hooks))
        .with_state(calls)
}

async fn send(app: &Router, uri: &str) -> Response {
    let request = axum::http::Request::builder()
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

async fn call(app: &Router, uri: &str) -> (StatusCode, HeaderMap, String) {
    let response = send(app, uri).await;

    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_second_request_is_served_from_cache() {
    let routebox = memory_routebox(CacheDefaults::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let app = counter_app(
        "/counter",
        routebox.route(expires_in(Duration::from_secs(60))).unwrap(),
        calls.clone(),
    );

    let (status, headers, body) = call(&app, "/counter").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "0");
    assert!(headers.get("x-was-cached").is_none());
    routebox.flush().await;

    let (status, headers, body) = call(&app, "/counter").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "0");
    assert_eq!(headers.get("x-was-cached").unwrap(), "true");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_entries_expire() {
    let routebox = memory_routebox(CacheDefaults::default());
    let app = counter_app(
        "/counter",
        routebox.route(expires_in(Duration::from_millis(100))).unwrap(),
        Arc::new(AtomicUsize::new(0)),
    );

    assert_eq!(call(&app, "/counter").await.2, "0");
    routebox.flush().await;
    assert_eq!(call(&app, "/counter").await.2, "0");

    sleep(Duration::from_millis(150)).await;

    let (_, headers, body) = call(&app, "/counter").await;
    assert_eq!(body, "1");
    assert!(headers.get("x-was-cached").is_none());
}

#[tokio::test]
async fn test_private_routes_are_never_cached() {
    let routebox = memory_routebox(CacheDefaults::default());
    let settings = RouteCacheSettings::new(
        CacheDirective::expires_in(Duration::from_secs(60)).with_privacy(Privacy::Private),
    );
    let app = counter_app("/:b", routebox.route(settings).unwrap(), Arc::new(AtomicUsize::new(0)));

    assert_eq!(call(&app, "/private").await.2, "0");
    routebox.flush().await;

    let (_, headers, body) = call(&app, "/private").await;
    assert_eq!(body, "1");
    assert!(headers.get("x-was-cached").is_none());
}

#[tokio::test]
async fn test_routes_without_expiry_are_not_cached() {
    let routebox = memory_routebox(CacheDefaults::default());
    let app = counter_app(
        "/counter",
        routebox.route(RouteCacheSettings::default()).unwrap(),
        Arc::new(AtomicUsize::new(0)),
    );

    assert_eq!(call(&app, "/counter").await.2, "0");
    routebox.flush().await;
    assert_eq!(call(&app, "/counter").await.2, "1");
}

#[tokio::test]
async fn test_uncacheable_status_is_retried() {
    async fn flaky(State(calls): State<Arc<AtomicUsize>>) -> Response {
        match calls.fetch_add(1, Ordering::SeqCst) {
            0 => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
            n => n.to_string().into_response(),
        }
    }

    let routebox = memory_routebox(CacheDefaults::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/flaky", get(flaky))
        .route_layer(middleware::from_fn_with_state(
            routebox.route(expires_in(Duration::from_secs(60))).unwrap(),
            cache_hooks,
        ))
        .with_state(calls.clone());

    let (status, _, _) = call(&app, "/flaky").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    routebox.flush().await;

    let (status, headers, body) = call(&app, "/flaky").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "1");
    assert!(headers.get("x-was-cached").is_none());
    routebox.flush().await;

    let (_, headers, body) = call(&app, "/flaky").await;
    assert_eq!(body, "1");
    assert_eq!(headers.get("x-was-cached").unwrap(), "true");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_nocache_suppresses_storage() {
    async fn volatile(State(calls): State<Arc<AtomicUsize>>, cache: NoCache) -> String {
        assert!(cache.is_applicable());
        cache.nocache();
        cache.nocache();
        calls.fetch_add(1, Ordering::SeqCst).to_string()
    }

    let routebox = memory_routebox(CacheDefaults::default());
    let app = Router::new()
        .route("/volatile", get(volatile))
        .route_layer(middleware::from_fn_with_state(
            routebox.route(expires_in(Duration::from_secs(60))).unwrap(),
            cache_hooks,
        ))
        .with_state(Arc::new(AtomicUsize::new(0)));

    assert_eq!(call(&app, "/volatile").await.2, "0");
    routebox.flush().await;
    assert_eq!(call(&app, "/volatile").await.2, "1");
}

#[tokio::test]
async fn test_nocache_outside_cached_routes_is_a_noop() {
    async fn plain(cache: NoCache) -> &'static str {
        cache.nocache();
        if cache.is_applicable() {
            "applicable"
        } else {
            "not applicable"
        }
    }

    let app = Router::new().route("/plain", get(plain));
    assert_eq!(call(&app, "/plain").await.2, "not applicable");
}

#[tokio::test]
async fn test_callbacks_fire_once_per_event() {
    let hits = Arc::new(Mutex::new(Vec::new()));
    let misses = Arc::new(Mutex::new(Vec::new()));

    let callbacks = {
        let hits = hits.clone();
        let misses = misses.clone();
        CacheCallbacks::new(
            move |request: &CacheRequest, response: &CacheResponse| {
                hits.lock()
                    .unwrap()
                    .push((request.path().to_string(), response.body.clone()));
            },
            move |request: &CacheRequest, response: &CacheResponse| {
                misses
                    .lock()
                    .unwrap()
                    .push((request.path().to_string(), response.body.clone()));
            },
        )
    };
    let routebox = memory_routebox(CacheDefaults {
        callbacks,
        ..CacheDefaults::default()
    });
    let app = counter_app(
        "/counter",
        routebox.route(expires_in(Duration::from_secs(60))).unwrap(),
        Arc::new(AtomicUsize::new(0)),
    );

    call(&app, "/counter").await;
    routebox.flush().await;
    call(&app, "/counter").await;

    let hits = hits.lock().unwrap();
    let misses = misses.lock().unwrap();
    assert_eq!(misses.len(), 1);
    assert_eq!(hits.len(), 1);
    assert_eq!(misses[0].0, "/counter");
    assert_eq!(misses[0].1.as_ref(), b"0");
    assert_eq!(hits[0].0, "/counter");
    assert_eq!(hits[0].1.as_ref(), b"0");
}

#[tokio::test]
async fn test_failing_backend_fails_open() {
    let routebox = routebox_with(Arc::new(FailingStore), CacheDefaults::default());
    let app = counter_app(
        "/counter",
        routebox.route(expires_in(Duration::from_secs(60))).unwrap(),
        Arc::new(AtomicUsize::new(0)),
    );

    let (status, headers, body) = call(&app, "/counter").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "0");
    assert!(headers.get("x-was-cached").is_none());
    routebox.flush().await;

    let (status, _, body) = call(&app, "/counter").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "1");
}

#[tokio::test]
async fn test_authenticated_requests_bypass_cache() {
    async fn mark_authenticated(mut request: Request, next: Next) -> Response {
        request.extensions_mut().insert(Authenticated);
        next.run(request).await
    }

    let routebox = memory_routebox(CacheDefaults {
        skip_authenticated: true,
        ..CacheDefaults::default()
    });
    let app = counter_app(
        "/me",
        routebox.route(expires_in(Duration::from_secs(60))).unwrap(),
        Arc::new(AtomicUsize::new(0)),
    )
    .layer(middleware::from_fn(mark_authenticated));

    assert_eq!(call(&app, "/me").await.2, "0");
    routebox.flush().await;
    assert_eq!(call(&app, "/me").await.2, "1");
}

#[tokio::test]
async fn test_query_order_does_not_matter() {
    let routebox = memory_routebox(CacheDefaults::default());
    let app = counter_app(
        "/items",
        routebox.route(expires_in(Duration::from_secs(60))).unwrap(),
        Arc::new(AtomicUsize::new(0)),
    );

    assert_eq!(call(&app, "/items?a=1&b=2").await.2, "0");
    routebox.flush().await;

    let (_, headers, body) = call(&app, "/items?b=2&a=1").await;
    assert_eq!(body, "0");
    assert_eq!(headers.get("x-was-cached").unwrap(), "true");

    assert_eq!(call(&app, "/items?a=1&b=3").await.2, "1");
}

#[tokio::test]
async fn test_distinct_paths_are_cached_separately() {
    let routebox = memory_routebox(CacheDefaults::default());
    let app = counter_app(
        "/items/:id",
        routebox.route(expires_in(Duration::from_secs(60))).unwrap(),
        Arc::new(AtomicUsize::new(0)),
    );

    assert_eq!(call(&app, "/items/1").await.2, "0");
    routebox.flush().await;
    assert_eq!(call(&app, "/items/2").await.2, "1");
    routebox.flush().await;
    assert_eq!(call(&app, "/items/1").await.2, "0");
}

#[tokio::test]
async fn test_custom_hit_header() {
    let routebox = memory_routebox(CacheDefaults::default());
    let settings = expires_in(Duration::from_secs(60)).with_overrides(RouteOverrides {
        was_cached_header: Some("X-Cache-Hit".to_string()),
        ..RouteOverrides::default()
    });
    let route = routebox.route(settings).unwrap();
    let app = counter_app("/counter", route, Arc::new(AtomicUsize::new(0)));

    call(&app, "/counter").await;
    routebox.flush().await;

    let (_, headers, _) = call(&app, "/counter").await;
    assert_eq!(headers.get("x-cache-hit").unwrap(), "true");
    assert!(headers.get("x-was-cached").is_none());
}

#[tokio::test]
async fn test_route_naming_unknown_backend_is_rejected() {
    let routebox = memory_routebox(CacheDefaults::default());
    let settings = expires_in(Duration::from_secs(60)).with_overrides(RouteOverrides {
        backend: Some("redis-main".to_string()),
        ..RouteOverrides::default()
    });

    let err = routebox.route(settings).err().unwrap();
    assert!(err.is_fatal());
    assert_eq!(err.error_type(), "config_validation_error");
}

/// Sends one chunk, then fails, while claiming an exact length
struct TruncatedBody {
    sent: bool,
}

impl HttpBody for TruncatedBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        if self.sent {
            return Poll::Ready(Some(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "upstream died",
            ))));
        }
        self.sent = true;
        Poll::Ready(Some(Ok(Frame::data(Bytes::from_static(b"partial")))))
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(16)
    }
}

fn failing_stream() -> Body {
    Body::from_stream(futures::stream::iter([
        Ok::<_, io::Error>(Bytes::from_static(b"partial")),
        Err(io::Error::new(io::ErrorKind::UnexpectedEof, "upstream died")),
    ]))
}

/// Router whose handler counts calls and builds its response with `respond`
fn body_app(route: RouteCache, calls: Arc<AtomicUsize>, respond: fn() -> Response) -> Router {
    Router::new()
        .route(
            "/body",
            get(move |State(calls): State<Arc<AtomicUsize>>| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                respond()
            }),
        )
        .route_layer(middleware::from_fn_with_state(route, cache_hooks))
        .with_state(calls)
}

#[tokio::test]
async fn test_uncacheable_stream_error_reaches_client() {
    let routebox = memory_routebox(CacheDefaults::default());
    let route = routebox.route(expires_in(Duration::from_secs(60))).unwrap();
    let app = body_app(route, Arc::new(AtomicUsize::new(0)), || {
        (StatusCode::INTERNAL_SERVER_ERROR, failing_stream()).into_response()
    });

    let response = send(&app, "/body").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());
}

#[tokio::test]
async fn test_failing_stream_is_forwarded_and_not_cached() {
    let routebox = memory_routebox(CacheDefaults::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let route = routebox.route(expires_in(Duration::from_secs(60))).unwrap();
    let app = body_app(route, calls.clone(), || failing_stream().into_response());

    for _ in 0..2 {
        let response = send(&app, "/body").await;
        assert!(response.headers().get("x-was-cached").is_none());
        assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());
        routebox.flush().await;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_body_read_failure_is_surfaced() {
    let routebox = memory_routebox(CacheDefaults::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let route = routebox.route(expires_in(Duration::from_secs(60))).unwrap();
    let app = body_app(route, calls.clone(), || {
        Body::new(TruncatedBody { sent: false }).into_response()
    });

    let response = send(&app, "/body").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());
    routebox.flush().await;

    let response = send(&app, "/body").await;
    assert!(response.headers().get("x-was-cached").is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_streamed_body_passes_through_uncached() {
    let routebox = memory_routebox(CacheDefaults::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let route = routebox.route(expires_in(Duration::from_secs(60))).unwrap();
    let app = body_app(route, calls.clone(), || {
        let chunks = [
            Ok::<_, io::Error>(Bytes::from_static(b"str")),
            Ok(Bytes::from_static(b"eamed")),
        ];
        Body::from_stream(futures::stream::iter(chunks)).into_response()
    });

    assert_eq!(call(&app, "/body").await.2, "streamed");
    routebox.flush().await;

    let (_, headers, body) = call(&app, "/body").await;
    assert_eq!(body, "streamed");
    assert!(headers.get("x-was-cached").is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_oversized_body_is_not_cached() {
    let routebox = memory_routebox(CacheDefaults::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let settings = expires_in(Duration::from_secs(60)).with_overrides(RouteOverrides {
        max_body_bytes: Some(4),
        ..RouteOverrides::default()
    });
    let app = body_app(routebox.route(settings).unwrap(), calls.clone(), || {
        "larger than four bytes".into_response()
    });

    assert_eq!(call(&app, "/body").await.2, "larger than four bytes");
    routebox.flush().await;

    let (_, headers, body) = call(&app, "/body").await;
    assert_eq!(body, "larger than four bytes");
    assert!(headers.get("x-was-cached").is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
