//! Database Backend Abstractions
//!
//! Driver-independent traits the runtime is written against, and the MySQL
//! implementation on sqlx.

pub mod core;
pub mod mysql;

// Re-export core traits and types
pub use self::core::*;
pub use mysql::{map_sqlx_error, MySqlBackend};
