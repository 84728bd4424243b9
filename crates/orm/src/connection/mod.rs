//! Connection Management
//!
//! Liveness verification with bounded retries, and pool health reporting.

pub mod authenticate;
pub mod health;

pub use authenticate::{authenticate, RetryPolicy};
pub use health::PoolHealthReport;
