//! # Structured Logging
//!
//! Installs the process-wide tracing subscriber. Library code only emits
//! events; the binary (or the embedding application) decides whether to call
//! [`init_logging`].
//!
//! Routebox events use the `routebox` target, so `RUST_LOG=routebox=debug`
//! shows every hit/miss decision without raising the level elsewhere.

use tracing::level_filters::LevelFilter;
use tracing::{warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::observability::config::{LogConfig, LogFormat};

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install the global subscriber. Returns `false` when one was already set.
pub fn init_logging(config: &LogConfig) -> bool {
    // RUST_LOG wins over the configured level when present.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = LevelFilter::from_level(parse_level(&config.level));
        EnvFilter::default().add_directive(level.into())
    });

    let result = match config.format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init(),
        LogFormat::Text => Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init(),
    };

    if result.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
        return false;
    }
    true
}
