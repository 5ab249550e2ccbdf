//! # Configuration Module
//!
//! Configuration is loaded once, before any route is registered. Loading
//! applies environment overrides and then validates the whole document;
//! every validation problem is reported in a single
//! [`RouteboxError::Configuration`] so operators can fix them in one pass.
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde
//! - Environment variable override support (`ROUTEBOX_*`)
//! - Named backend declarations (in-memory or Redis)

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::caching::hooks::CacheCallbacks;
use crate::caching::key_generator::DigestAlgorithm;
use crate::caching::stores::{InMemoryCacheConfig, RedisCacheConfig};
use crate::core::error::{RouteboxError, RouteboxResult};
use crate::observability::config::LogConfig;

/// Name of the backend used when none is configured
pub const DEFAULT_BACKEND: &str = "_default";

/// Largest response body buffered for storage unless configured otherwise
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Which request attributes feed the cache ident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    /// Include the full query parameters
    pub query: bool,

    /// Include the HTTP method
    pub method: bool,

    /// Include the request path
    pub route: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            query: true,
            method: true,
            route: true,
        }
    }
}

/// Global caching defaults, applied to every route unless overridden
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheDefaults {
    /// Name of the backend instance to store responses in
    #[serde(rename = "cache")]
    pub backend: String,

    /// Master switch for caching
    pub enabled: bool,

    /// Digest used to hash the cache ident
    pub digest: DigestAlgorithm,

    /// Backend namespace for stored responses
    pub segment: String,

    /// Header set to `true` on responses served from cache
    pub was_cached_header: String,

    /// Request attributes that feed the ident
    pub parse: ParseOptions,

    /// Bypass the cache entirely for authenticated requests
    pub skip_authenticated: bool,

    /// Responses whose body may exceed this size are passed through uncached
    pub max_body_bytes: usize,

    /// Hit/miss hooks, registered in code
    #[serde(skip)]
    pub callbacks: CacheCallbacks,
}

impl Default for CacheDefaults {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            enabled: true,
            digest: DigestAlgorithm::Djb2,
            segment: "routebox".to_string(),
            was_cached_header: "X-Was-Cached".to_string(),
            parse: ParseOptions::default(),
            skip_authenticated: false,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            callbacks: CacheCallbacks::default(),
        }
    }
}

impl CacheDefaults {
    /// Collect validation problems instead of failing on the first one
    pub(crate) fn collect_errors(&self, errors: &mut Vec<String>) {
        if self.backend.trim().is_empty() {
            errors.push("cache (backend name) cannot be empty".to_string());
        }
        if self.segment.trim().is_empty() {
            errors.push("segment cannot be empty".to_string());
        }
        if let Err(e) = validate_header_name(&self.was_cached_header) {
            errors.push(e);
        }
        if self.max_body_bytes == 0 {
            errors.push("max_body_bytes must be greater than 0".to_string());
        }
    }

    pub fn validate(&self) -> RouteboxResult<()> {
        let mut errors = Vec::new();
        self.collect_errors(&mut errors);
        into_result(errors)
    }
}

pub(crate) fn validate_header_name(name: &str) -> Result<(), String> {
    axum::http::HeaderName::from_bytes(name.as_bytes())
        .map(|_| ())
        .map_err(|_| format!("was_cached_header '{}' is not a valid HTTP header name", name))
}

pub(crate) fn into_result(errors: Vec<String>) -> RouteboxResult<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(RouteboxError::config(format!(
            "Configuration validation failed:\n  - {}",
            errors.join("\n  - ")
        )))
    }
}

/// A named backend declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,

    #[serde(flatten)]
    pub kind: BackendKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendKind {
    Memory(InMemoryCacheConfig),
    Redis(RedisCacheConfig),
}

/// Settings for the demo server binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_address: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Complete routebox configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteboxConfig {
    /// Global caching defaults
    pub defaults: CacheDefaults,

    /// Declared backend instances
    pub backends: Vec<BackendConfig>,

    /// Upper bound on a single backend get/set
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,

    /// Logging settings
    pub logging: LogConfig,

    /// Demo server settings
    pub server: ServerSettings,
}

impl Default for RouteboxConfig {
    fn default() -> Self {
        Self {
            defaults: CacheDefaults::default(),
            backends: vec![BackendConfig {
                name: DEFAULT_BACKEND.to_string(),
                kind: BackendKind::Memory(InMemoryCacheConfig::default()),
            }],
            operation_timeout: Duration::from_secs(1),
            logging: LogConfig::default(),
            server: ServerSettings::default(),
        }
    }
}

impl RouteboxConfig {
    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> RouteboxResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RouteboxError::config(format!("Failed to read config file: {}", e)))?;

        let config: RouteboxConfig = serde_yaml::from_str(&content)
            .map_err(|e| RouteboxError::config(format!("Failed to parse config: {}", e)))?;

        config.finish()
    }

    /// Load configuration from JSON
    pub async fn load_from_json<P: AsRef<Path>>(path: P) -> RouteboxResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RouteboxError::config(format!("Failed to read config file: {}", e)))?;

        let config: RouteboxConfig = serde_json::from_str(&content)
            .map_err(|e| RouteboxError::config(format!("Failed to parse JSON config: {}", e)))?;

        config.finish()
    }

    /// Built-in defaults with environment overrides applied
    pub fn from_env() -> RouteboxResult<Self> {
        Self::default().finish()
    }

    fn finish(mut self) -> RouteboxResult<Self> {
        self.apply_env_overrides()?;
        self.validate()?;
        Ok(self)
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Variables follow the pattern `ROUTEBOX_<FIELD>`, e.g. `ROUTEBOX_SEGMENT=pages`.
    pub fn apply_env_overrides(&mut self) -> RouteboxResult<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    pub(crate) fn apply_overrides_from<F>(&mut self, lookup: F) -> RouteboxResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(enabled) = lookup("ROUTEBOX_ENABLED") {
            self.defaults.enabled = enabled
                .parse()
                .map_err(|e| RouteboxError::config(format!("Invalid ROUTEBOX_ENABLED: {}", e)))?;
        }

        if let Some(digest) = lookup("ROUTEBOX_DIGEST") {
            self.defaults.digest = digest
                .parse()
                .map_err(|e| RouteboxError::config(format!("Invalid ROUTEBOX_DIGEST: {}", e)))?;
        }

        if let Some(segment) = lookup("ROUTEBOX_SEGMENT") {
            self.defaults.segment = segment;
        }

        if let Some(backend) = lookup("ROUTEBOX_CACHE") {
            self.defaults.backend = backend;
        }

        if let Some(header) = lookup("ROUTEBOX_WAS_CACHED_HEADER") {
            self.defaults.was_cached_header = header;
        }

        if let Some(timeout) = lookup("ROUTEBOX_OPERATION_TIMEOUT") {
            self.operation_timeout = humantime::parse_duration(&timeout).map_err(|e| {
                RouteboxError::config(format!("Invalid ROUTEBOX_OPERATION_TIMEOUT: {}", e))
            })?;
        }

        if let Some(level) = lookup("ROUTEBOX_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(addr) = lookup("ROUTEBOX_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        Ok(())
    }

    /// Validate the whole document, reporting every problem found
    pub fn validate(&self) -> RouteboxResult<()> {
        let mut errors = Vec::new();

        self.defaults.collect_errors(&mut errors);

        let mut names = HashSet::new();
        for backend in &self.backends {
            if backend.name.trim().is_empty() {
                errors.push("backend name cannot be empty".to_string());
            } else if !names.insert(backend.name.as_str()) {
                errors.push(format!("backend '{}' is declared more than once", backend.name));
            }

            if let BackendKind::Redis(redis) = &backend.kind {
                if redis.url.is_empty() {
                    errors.push(format!("backend '{}' has an empty redis url", backend.name));
                }
            }
        }

        let default_backend = self.defaults.backend.as_str();
        if !default_backend.trim().is_empty() && !names.contains(default_backend) {
            errors.push(format!(
                "default cache '{}' does not name a declared backend",
                self.defaults.backend
            ));
        }

        if self.operation_timeout.is_zero() {
            errors.push("operation_timeout must be greater than 0".to_string());
        }

        if self.server.bind_address.is_empty() {
            errors.push("bind_address cannot be empty".to_string());
        }

        into_result(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = RouteboxConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.defaults.backend, "_default");
        assert_eq!(config.defaults.segment, "routebox");
        assert_eq!(config.defaults.was_cached_header, "X-Was-Cached");
        assert_eq!(config.defaults.digest, DigestAlgorithm::Djb2);
        assert!(config.defaults.enabled);
        assert_eq!(config.defaults.parse, ParseOptions::default());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
defaults:
  digest: sha256
  parse:
    query: false
backends:
  - name: _default
    kind: memory
    max_entries: 50
operation_timeout: 250ms
"#;
        let config: RouteboxConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.defaults.digest, DigestAlgorithm::Sha256);
        assert!(!config.defaults.parse.query);
        assert!(config.defaults.parse.method);
        assert_eq!(config.defaults.segment, "routebox");
        assert_eq!(config.operation_timeout, Duration::from_millis(250));
        match &config.backends[0].kind {
            BackendKind::Memory(memory) => assert_eq!(memory.max_entries, 50),
            other => panic!("unexpected backend kind: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_digest_is_rejected() {
        let yaml = "defaults:\n  digest: crc32\n";
        assert!(serde_yaml::from_str::<RouteboxConfig>(yaml).is_err());
    }

    #[test]
    fn test_validation_reports_every_problem() {
        let mut config = RouteboxConfig::default();
        config.defaults.segment = String::new();
        config.defaults.was_cached_header = "not a header".to_string();
        config.defaults.backend = "redis-main".to_string();

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("segment cannot be empty"));
        assert!(message.contains("not a valid HTTP header name"));
        assert!(message.contains("does not name a declared backend"));
    }

    #[test]
    fn test_zero_body_limit_rejected() {
        let mut config = RouteboxConfig::default();
        config.defaults.max_body_bytes = 0;
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("max_body_bytes"));
    }

    #[test]
    fn test_duplicate_backend_names_rejected() {
        let mut config = RouteboxConfig::default();
        config.backends.push(config.backends[0].clone());
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("declared more than once"));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ROUTEBOX_ENABLED", "false"),
            ("ROUTEBOX_DIGEST", "md5"),
            ("ROUTEBOX_SEGMENT", "pages"),
            ("ROUTEBOX_OPERATION_TIMEOUT", "2s"),
        ]
        .into_iter()
        .collect();

        let mut config = RouteboxConfig::default();
        config
            .apply_overrides_from(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert!(!config.defaults.enabled);
        assert_eq!(config.defaults.digest, DigestAlgorithm::Md5);
        assert_eq!(config.defaults.segment, "pages");
        assert_eq!(config.operation_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_env_override_is_fatal() {
        let mut config = RouteboxConfig::default();
        let result = config.apply_overrides_from(|name| {
            (name == "ROUTEBOX_ENABLED").then(|| "maybe".to_string())
        });
        assert!(matches!(result, Err(RouteboxError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "defaults:\n  segment: articles\n  was_cached_header: X-Cache-Hit\n\
             logging:\n  level: debug\n  format: text"
        )
        .unwrap();

        let config = RouteboxConfig::load_from_file(file.path()).await.unwrap();
        assert_eq!(config.defaults.segment, "articles");
        assert_eq!(config.defaults.was_cached_header, "X-Cache-Hit");
        assert_eq!(config.logging.level, "debug");
    }

    #[tokio::test]
    async fn test_load_missing_file_is_config_error() {
        let result = RouteboxConfig::load_from_file("/definitely/not/here.yaml").await;
        assert!(matches!(result, Err(RouteboxError::Configuration { .. })));
    }
}
