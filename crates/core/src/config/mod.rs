//! Database configuration surface
//!
//! Loading (environment, YAML) and validation of the connection settings
//! consumed by the runtime. Values are immutable once built.

pub mod database;
pub mod validation;

pub use database::DatabaseConfig;
pub use validation::ConfigError;
