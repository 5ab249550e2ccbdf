//! # Core Types Module
//!
//! Host-neutral request and response views. The interceptors only ever see
//! these types, so any server framework that can produce them from its own
//! request/response objects can drive the caching engine.

use axum::http::{HeaderMap, Method, StatusCode, Uri};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The request attributes routebox needs to make a caching decision
#[derive(Debug, Clone)]
pub struct CacheRequest {
    /// Unique identifier for this request (for log correlation)
    pub id: String,

    /// HTTP method
    pub method: Method,

    /// Request URI including path and query parameters
    pub uri: Uri,

    /// Request headers
    pub headers: HeaderMap,

    /// Route template the router matched, e.g. `/users/:id`
    pub matched_route: Option<String>,

    /// Whether the host authenticated the requester
    pub authenticated: bool,
}

impl CacheRequest {
    /// Create a new request view with a generated ID
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            method,
            uri,
            headers: HeaderMap::new(),
            matched_route: None,
            authenticated: false,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_matched_route<S: Into<String>>(mut self, route: S) -> Self {
        self.matched_route = Some(route.into());
        self
    }

    pub fn with_authenticated(mut self, authenticated: bool) -> Self {
        self.authenticated = authenticated;
        self
    }

    /// Get the request path without query parameters
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Get the raw query string
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Get a header value by name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }
}

/// How the response body was produced by the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseVariety {
    /// A plain value rendered by the handler (text, JSON, ...)
    #[default]
    Plain,
    /// A pre-built byte buffer
    Buffer,
    /// A streamed body that was collected before storing
    Stream,
}

impl fmt::Display for ResponseVariety {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseVariety::Plain => write!(f, "plain"),
            ResponseVariety::Buffer => write!(f, "buffer"),
            ResponseVariety::Stream => write!(f, "stream"),
        }
    }
}

/// A fully materialised response, as produced by a handler or replayed from cache
#[derive(Debug, Clone)]
pub struct CacheResponse {
    /// HTTP status code
    pub status: StatusCode,

    /// Response headers
    pub headers: HeaderMap,

    /// Response body
    pub body: Bytes,

    /// Body representation
    pub variety: ResponseVariety,
}

impl CacheResponse {
    /// Create a new response
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            variety: ResponseVariety::Buffer,
        }
    }

    /// Create a simple text response
    pub fn text<S: Into<String>>(status: StatusCode, text: S) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self {
            status,
            headers,
            body: Bytes::from(text.into()),
            variety: ResponseVariety::Plain,
        }
    }

    /// Create a JSON response
    pub fn json<T: Serialize>(status: StatusCode, data: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(data)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/json"),
        );
        Ok(Self {
            status,
            headers,
            body: Bytes::from(body),
            variety: ResponseVariety::Plain,
        })
    }

    pub fn with_variety(mut self, variety: ResponseVariety) -> Self {
        self.variety = variety;
        self
    }

    /// Get a header value by name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }
}
