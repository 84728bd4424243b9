//! # holdfast-core
//!
//! Configuration and logging foundation shared by the holdfast crates.
//! The database runtime itself lives in `holdfast-orm`.

pub mod config;
pub mod logging;

pub use config::{ConfigError, DatabaseConfig};
pub use logging::{init_logging, LoggingConfig};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get framework version
pub fn version() -> &'static str {
    VERSION
}
