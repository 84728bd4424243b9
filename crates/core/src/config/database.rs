use std::env;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use super::validation::ConfigError;

/// Default MySQL port
pub const DEFAULT_PORT: u16 = 3306;

/// Default environment variable prefix used by [`DatabaseConfig::from_env`]
pub const DEFAULT_ENV_PREFIX: &str = "DB";

const REDACTED: &str = "**********";

/// Connection settings for one database.
///
/// Treated as an immutable value: the runtime and the test-database guard
/// read it but never change it. `Debug` masks the password.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default, alias = "sslEnabled", alias = "ssl_enabled")]
    pub ssl: bool,
    #[serde(default)]
    pub verbose: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl DatabaseConfig {
    /// Create a configuration with default port, no TLS and quiet output
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        user: impl Into<String>,
        pass: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: DEFAULT_PORT,
            user: user.into(),
            pass: pass.into(),
            ssl: false,
            verbose: false,
        }
    }

    /// Disposable local database: loopback, root, empty password
    pub fn local(name: impl Into<String>) -> Self {
        Self::new(name, "127.0.0.1", "root", "")
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Copy of this configuration pointing at another database on the same server
    pub fn for_database(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Load configuration from `DB_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_prefix(DEFAULT_ENV_PREFIX)
    }

    /// Load configuration from `{prefix}_NAME`, `{prefix}_HOST`, `{prefix}_PORT`,
    /// `{prefix}_USER`, `{prefix}_PASS`, `{prefix}_SSL` and `{prefix}_VERBOSE`
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        let var = |key: &str| env::var(format!("{}_{}", prefix, key)).ok();

        let name = var("NAME").ok_or_else(|| {
            ConfigError::missing_required("name", format!("Set the {}_NAME environment variable", prefix))
        })?;
        let host = var("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let user = var("USER").ok_or_else(|| {
            ConfigError::missing_required("user", format!("Set the {}_USER environment variable", prefix))
        })?;

        let mut config = Self::new(name, host, user, var("PASS").unwrap_or_default());

        if let Some(port_str) = var("PORT") {
            config.port = port_str.parse().map_err(|_| {
                ConfigError::invalid_value("port", port_str, "valid port number (1-65535)")
            })?;
        }
        if let Some(ssl) = var("SSL") {
            config.ssl = parse_flag("ssl", &ssl)?;
        }
        if let Some(verbose) = var("VERBOSE") {
            config.verbose = parse_flag("verbose", &verbose)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML document
    pub fn from_yaml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML configuration file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&source)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::missing_required("name", "Database name must be a non-empty string"));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::missing_required("host", "Database host must be a non-empty string"));
        }
        if self.user.trim().is_empty() {
            return Err(ConfigError::missing_required("user", "Database user must be a non-empty string"));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid_value("port", "0", "port between 1 and 65535"));
        }
        Ok(())
    }

    /// JSON view of the configuration with every credential-like key masked
    pub fn redacted(&self) -> JsonValue {
        let mut value = json!({
            "name": self.name,
            "host": self.host,
            "port": self.port,
            "user": self.user,
            "pass": self.pass,
            "ssl": self.ssl,
            "verbose": self.verbose,
        });

        if let Some(fields) = value.as_object_mut() {
            for (key, field) in fields.iter_mut() {
                if key.contains("pass") {
                    *field = JsonValue::String(REDACTED.to_string());
                }
            }
        }
        value
    }

    /// Pretty-printed redacted configuration, for diagnostics
    pub fn redacted_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.redacted()).unwrap_or_else(|_| self.redacted().to_string())
    }

    /// `host:port` of the server
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("pass", &REDACTED)
            .field("ssl", &self.ssl)
            .field("verbose", &self.verbose)
            .finish()
    }
}

fn parse_flag(field: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::invalid_value(field, raw, "true or false")),
    }
}
