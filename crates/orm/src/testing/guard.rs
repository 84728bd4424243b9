//! Test database safety gate
//!
//! Destructive operations (create, wipe, teardown) only run against a
//! configuration shaped like a disposable local database whose name carries
//! a test marker. Anything else is rejected before a single statement runs.

use holdfast_core::DatabaseConfig;

use crate::error::{ModelError, OrmResult, UnsafeTargetError};

/// Required marker on test database names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameMarker {
    Prefix(String),
    Suffix(String),
}

impl NameMarker {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            NameMarker::Prefix(prefix) => name.starts_with(prefix.as_str()),
            NameMarker::Suffix(suffix) => name.ends_with(suffix.as_str()),
        }
    }

    /// Human-readable requirement, e.g. `end with "_test"`
    pub fn requirement(&self) -> String {
        match self {
            NameMarker::Prefix(prefix) => format!("begin with \"{}\"", prefix),
            NameMarker::Suffix(suffix) => format!("end with \"{}\"", suffix),
        }
    }
}

/// Signature a configuration must match to count as a test database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDatabaseRules {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub marker: NameMarker,
    /// Exit the process on rejection instead of returning an error
    pub halt_on_rejection: bool,
}

impl Default for TestDatabaseRules {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "root".to_string(),
            pass: String::new(),
            marker: NameMarker::Suffix("_test".to_string()),
            halt_on_rejection: true,
        }
    }
}

impl TestDatabaseRules {
    pub fn with_marker(mut self, marker: NameMarker) -> Self {
        self.marker = marker;
        self
    }

    /// Return [`ModelError::UnsafeTarget`] on rejection instead of exiting
    pub fn returning_errors(mut self) -> Self {
        self.halt_on_rejection = false;
        self
    }
}

/// Validates configurations against [`TestDatabaseRules`]
#[derive(Debug, Clone, Default)]
pub struct TestDatabaseGuard {
    rules: TestDatabaseRules,
}

impl TestDatabaseGuard {
    pub fn new(rules: TestDatabaseRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &TestDatabaseRules {
        &self.rules
    }

    /// Check both the endpoint signature and the name marker
    pub fn validate(&self, config: &DatabaseConfig) -> Result<(), UnsafeTargetError> {
        let rules = &self.rules;

        if config.host != rules.host || config.port != rules.port || config.user != rules.user || config.pass != rules.pass
        {
            return Err(UnsafeTargetError::Endpoint {
                config: config.redacted_pretty(),
            });
        }

        if !rules.marker.matches(&config.name) {
            return Err(UnsafeTargetError::Name {
                name: config.name.clone(),
                requirement: rules.marker.requirement(),
                config: config.redacted_pretty(),
            });
        }

        Ok(())
    }

    /// Gate a destructive operation.
    ///
    /// On rejection the redacted configuration is printed; the process then
    /// exits with status 1 unless the rules ask for an error instead.
    pub fn enforce(&self, config: &DatabaseConfig) -> OrmResult<()> {
        let Err(rejection) = self.validate(config) else {
            return Ok(());
        };

        tracing::error!(
            database = %config.name,
            endpoint = %config.endpoint(),
            "Refusing destructive operation on a database that is not a test database"
        );
        eprintln!("WARNING:\n{}", rejection);
        if let UnsafeTargetError::Name { config, .. } = &rejection {
            eprintln!("Please check your database config:\n{}", config);
        }

        if self.rules.halt_on_rejection {
            std::process::exit(1);
        }

        Err(ModelError::from(rejection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> TestDatabaseGuard {
        TestDatabaseGuard::new(TestDatabaseRules::default().returning_errors())
    }

    #[test]
    fn test_accepts_local_test_database() {
        assert!(guard().validate(&DatabaseConfig::local("orders_test")).is_ok());
        assert!(guard().enforce(&DatabaseConfig::local("orders_test")).is_ok());
    }

    #[test]
    fn test_rejects_non_local_endpoints() {
        let base = DatabaseConfig::local("orders_test");
        let cases = vec![
            DatabaseConfig { host: "db.internal".into(), ..base.clone() },
            DatabaseConfig { host: "localhost".into(), ..base.clone() },
            base.clone().with_port(3307),
            DatabaseConfig { user: "app".into(), ..base.clone() },
            DatabaseConfig { pass: "hunter2".into(), ..base.clone() },
        ];

        for config in cases {
            let err = guard().validate(&config).unwrap_err();
            assert!(matches!(err, UnsafeTargetError::Endpoint { .. }), "{:?}", config);
            assert!(!err.to_string().contains("hunter2"));
        }
    }

    #[test]
    fn test_rejects_unmarked_name_on_valid_endpoint() {
        let err = guard().validate(&DatabaseConfig::local("orders")).unwrap_err();
        match err {
            UnsafeTargetError::Name { ref name, ref requirement, .. } => {
                assert_eq!(name, "orders");
                assert_eq!(requirement, "end with \"_test\"");
            }
            other => panic!("unexpected rejection: {:?}", other),
        }
        assert!(guard().validate(&DatabaseConfig::local("test_orders")).is_err());
    }

    #[test]
    fn test_prefix_marker() {
        let guard = TestDatabaseGuard::new(
            TestDatabaseRules::default()
                .with_marker(NameMarker::Prefix("acme_test_".into()))
                .returning_errors(),
        );
        assert!(guard.validate(&DatabaseConfig::local("acme_test_orders")).is_ok());
        assert!(guard.validate(&DatabaseConfig::local("orders_test")).is_err());
    }

    #[test]
    fn test_enforce_returns_unsafe_target_error() {
        let err = guard().enforce(&DatabaseConfig::local("production")).unwrap_err();
        assert!(matches!(err, ModelError::UnsafeTarget(ref msg) if msg.contains("\"production\"")));
    }
}
