//! # Policy Resolution
//!
//! A route contributes two inputs to its caching policy:
//!
//! - its **cache directive** ([`CacheDirective`]): expiry, privacy and the
//!   cacheable status codes. These belong to the route's own cache contract
//!   and can never be set globally.
//! - optional **overrides** ([`RouteOverrides`]) of the global
//!   [`CacheDefaults`].
//!
//! [`resolve`] merges the two over the defaults and yields a [`RoutePolicy`],
//! or `None` when the route should not be cached at all. It is a pure function
//! and is called afresh in both the lookup and the store phase.

use axum::http::HeaderName;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::cache_manager::PolicySpec;
use super::hooks::CacheCallbacks;
use super::key_generator::DigestAlgorithm;
use crate::core::config::{validate_header_name, CacheDefaults, ParseOptions};

/// Who may cache the response downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    Public,
    Private,
}

/// The route's own cache contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheDirective {
    /// Lifetime of a stored response
    #[serde(with = "humantime_serde")]
    pub expires_in: Option<Duration>,

    /// Wall-clock time (UTC) at which stored responses expire every day
    #[serde(with = "time_of_day")]
    pub expires_at: Option<NaiveTime>,

    /// Cache privacy; anything other than public disables caching
    pub privacy: Option<Privacy>,

    /// Status codes eligible for storage
    pub statuses: Vec<u16>,
}

impl Default for CacheDirective {
    fn default() -> Self {
        Self {
            expires_in: None,
            expires_at: None,
            privacy: None,
            statuses: vec![200],
        }
    }
}

impl CacheDirective {
    pub fn expires_in(ttl: Duration) -> Self {
        Self {
            expires_in: Some(ttl),
            ..Self::default()
        }
    }

    pub fn expires_at(time: NaiveTime) -> Self {
        Self {
            expires_at: Some(time),
            ..Self::default()
        }
    }

    pub fn with_privacy(mut self, privacy: Privacy) -> Self {
        self.privacy = Some(privacy);
        self
    }

    pub fn with_statuses<I: IntoIterator<Item = u16>>(mut self, statuses: I) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    fn is_cacheable(&self) -> bool {
        let has_expiry = self.expires_in.is_some() || self.expires_at.is_some();
        let public = matches!(self.privacy, None | Some(Privacy::Public));
        has_expiry && public
    }
}

/// Per-field overrides of the nested parse flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOverrides {
    pub query: Option<bool>,
    pub method: Option<bool>,
    pub route: Option<bool>,
}

/// Route-level overrides of [`CacheDefaults`]; `None` keeps the default
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteOverrides {
    #[serde(rename = "cache")]
    pub backend: Option<String>,
    pub enabled: Option<bool>,
    pub digest: Option<DigestAlgorithm>,
    pub segment: Option<String>,
    pub was_cached_header: Option<String>,
    pub parse: Option<ParseOverrides>,
    pub skip_authenticated: Option<bool>,
    pub max_body_bytes: Option<usize>,
    #[serde(skip)]
    pub callbacks: Option<CacheCallbacks>,
}

impl RouteOverrides {
    pub(crate) fn collect_errors(&self, errors: &mut Vec<String>) {
        if let Some(backend) = &self.backend {
            if backend.trim().is_empty() {
                errors.push("route cache (backend name) cannot be empty".to_string());
            }
        }
        if let Some(segment) = &self.segment {
            if segment.trim().is_empty() {
                errors.push("route segment cannot be empty".to_string());
            }
        }
        if let Some(header) = &self.was_cached_header {
            if let Err(e) = validate_header_name(header) {
                errors.push(e);
            }
        }
        if self.max_body_bytes == Some(0) {
            errors.push("route max_body_bytes must be greater than 0".to_string());
        }
    }
}

/// Everything a route contributes to policy resolution
#[derive(Debug, Clone, Default)]
pub struct RouteCacheSettings {
    pub directive: CacheDirective,
    pub overrides: RouteOverrides,
}

impl RouteCacheSettings {
    pub fn new(directive: CacheDirective) -> Self {
        Self {
            directive,
            overrides: RouteOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: RouteOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Fully resolved caching rules for one route
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    pub backend: String,
    pub digest: DigestAlgorithm,
    pub segment: String,
    pub was_cached_header: HeaderName,
    pub parse: ParseOptions,
    pub skip_authenticated: bool,
    pub max_body_bytes: usize,
    pub callbacks: CacheCallbacks,
    pub expires_in: Option<Duration>,
    pub expires_at: Option<NaiveTime>,
    pub statuses: Vec<u16>,
}

impl RoutePolicy {
    pub fn is_cacheable_status(&self, status: u16) -> bool {
        self.statuses.contains(&status)
    }

    /// Backend handle parameters for this policy. Handles are always shared.
    pub fn policy_spec(&self) -> PolicySpec {
        PolicySpec {
            backend: self.backend.clone(),
            segment: self.segment.clone(),
            expires_in: self.expires_in,
            expires_at: self.expires_at,
            shared: true,
        }
    }
}

/// Merge defaults, route overrides and the route directive into a policy
pub fn resolve(
    directive: &CacheDirective,
    overrides: &RouteOverrides,
    defaults: &CacheDefaults,
) -> Option<RoutePolicy> {
    if !directive.is_cacheable() {
        return None;
    }

    if !overrides.enabled.unwrap_or(defaults.enabled) {
        return None;
    }

    let header = overrides
        .was_cached_header
        .as_deref()
        .unwrap_or(&defaults.was_cached_header);
    // Header names are validated at registration.
    let was_cached_header = HeaderName::from_bytes(header.as_bytes()).ok()?;

    let parse = match overrides.parse {
        Some(parse) => ParseOptions {
            query: parse.query.unwrap_or(defaults.parse.query),
            method: parse.method.unwrap_or(defaults.parse.method),
            route: parse.route.unwrap_or(defaults.parse.route),
        },
        None => defaults.parse,
    };

    Some(RoutePolicy {
        backend: overrides
            .backend
            .clone()
            .unwrap_or_else(|| defaults.backend.clone()),
        digest: overrides.digest.unwrap_or(defaults.digest),
        segment: overrides
            .segment
            .clone()
            .unwrap_or_else(|| defaults.segment.clone()),
        was_cached_header,
        parse,
        skip_authenticated: overrides
            .skip_authenticated
            .unwrap_or(defaults.skip_authenticated),
        max_body_bytes: overrides.max_body_bytes.unwrap_or(defaults.max_body_bytes),
        callbacks: overrides
            .callbacks
            .clone()
            .unwrap_or_else(|| defaults.callbacks.clone()),
        expires_in: directive.expires_in,
        expires_at: directive.expires_at,
        statuses: directive.statuses.clone(),
    })
}

/// `HH:MM` or `HH:MM:SS`
mod time_of_day {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(time) => serializer.serialize_str(&time.format("%H:%M:%S").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|value| {
            NaiveTime::parse_from_str(&value, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(&value, "%H:%M"))
                .map_err(|_| serde::de::Error::custom(format!("invalid time of day '{}'", value)))
        })
        .transpose()
    }
}
