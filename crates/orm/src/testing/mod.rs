//! Test database support: the safety gate and the create/teardown helpers
//! built on it.

pub mod guard;
pub mod lifecycle;

pub use guard::{NameMarker, TestDatabaseGuard, TestDatabaseRules};
pub use lifecycle::{create_test_database, quote_identifier, teardown_statements, teardown_test_database, TeardownReport};
