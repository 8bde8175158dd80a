//! # Vesper Utilities
//!
//! Shared utilities for the Vesper workspace: logging initialisation built on
//! `tracing`, and TOML configuration-file discovery.

pub mod config;
pub mod logging;

pub use config::{load_config, ConfigError, ConfigSource};
pub use logging::{init_logging, init_logging_with_level, LogFormat, LogLevel, LoggingError, LoggingGuard};
pub use tracing::{debug, error, info, trace, warn};
