// Logging configuration
pub mod config;

// Subscriber bootstrap
pub mod logging;

pub use config::{LogConfig, LogFormat};
pub use logging::init_logging;
