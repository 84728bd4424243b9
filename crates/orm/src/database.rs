//! Database runtime
//!
//! [`Database`] owns one session at a time: the configuration, the pool and
//! the model registry built against it. Initialising twice is a no-op;
//! setting up a test database discards the session and builds a new one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use holdfast_core::DatabaseConfig;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

use crate::backends::{
    rows_to_maps, ConnectionScope, DatabaseBackend, DatabasePool, DatabasePoolConfig, DatabaseTransaction,
    MySqlBackend,
};
use crate::connection::{authenticate, RetryPolicy};
use crate::error::{ModelError, OrmResult};
use crate::migrations::{
    check_drift, DriftReport, MigrationConfig, MigrationManager, MigrationRunResult, MigrationRunner, MigrationSource,
    MigrationTarget,
};
use crate::registry::{Entity, ModelHandle, ModelRegistry};
use crate::testing::{self, TeardownReport, TestDatabaseGuard, TestDatabaseRules};
use crate::transaction::{with_transaction, TransactionFuture, TransactionOptions};

/// Construction options for [`Database`]
#[derive(Clone)]
pub struct DatabaseOptions {
    migrations_dir: PathBuf,
    entities: Vec<Arc<dyn Entity>>,
    pool: DatabasePoolConfig,
    retry: RetryPolicy,
    transactions: TransactionOptions,
    test_rules: TestDatabaseRules,
}

impl DatabaseOptions {
    /// Options for a migration directory; the path must be non-empty
    pub fn new(migrations_dir: impl AsRef<Path>) -> OrmResult<Self> {
        let migrations_dir = migrations_dir.as_ref();
        if migrations_dir.as_os_str().to_string_lossy().trim().is_empty() {
            return Err(ModelError::Configuration(
                "migrations directory must be a non-empty path".to_string(),
            ));
        }

        Ok(Self {
            migrations_dir: migrations_dir.to_path_buf(),
            entities: Vec::new(),
            pool: DatabasePoolConfig::default(),
            retry: RetryPolicy::default(),
            transactions: TransactionOptions::default(),
            test_rules: TestDatabaseRules::default(),
        })
    }

    pub fn with_entity(mut self, entity: Arc<dyn Entity>) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn with_entities(mut self, entities: impl IntoIterator<Item = Arc<dyn Entity>>) -> Self {
        self.entities.extend(entities);
        self
    }

    pub fn with_pool_config(mut self, pool: DatabasePoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_transaction_options(mut self, transactions: TransactionOptions) -> Self {
        self.transactions = transactions;
        self
    }

    pub fn with_test_rules(mut self, test_rules: TestDatabaseRules) -> Self {
        self.test_rules = test_rules;
        self
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }
}

struct Session {
    config: DatabaseConfig,
    pool: Arc<dyn DatabasePool>,
    models: Arc<ModelRegistry>,
}

/// Resilient access runtime for one database
pub struct Database {
    options: DatabaseOptions,
    backend: Arc<dyn DatabaseBackend>,
    session: RwLock<Option<Arc<Session>>>,
    lifecycle: Mutex<()>,
}

impl Database {
    /// Runtime backed by MySQL
    pub fn new(options: DatabaseOptions) -> Self {
        Self::with_backend(options, Arc::new(MySqlBackend::new()))
    }

    pub fn with_backend(options: DatabaseOptions, backend: Arc<dyn DatabaseBackend>) -> Self {
        Self {
            options,
            backend,
            session: RwLock::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    fn current(&self) -> Option<Arc<Session>> {
        self.session.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn session(&self) -> OrmResult<Arc<Session>> {
        self.current().ok_or(ModelError::NotInitialized)
    }

    fn replace_session(&self, session: Option<Arc<Session>>) -> Option<Arc<Session>> {
        let mut slot = self.session.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, session)
    }

    fn guard(&self) -> TestDatabaseGuard {
        TestDatabaseGuard::new(self.options.test_rules.clone())
    }

    fn migration_runner_for(&self, config: &DatabaseConfig, pool: Arc<dyn DatabasePool>) -> MigrationRunner {
        let migrations = MigrationConfig::new(&self.options.migrations_dir).with_verbose(config.verbose);
        MigrationRunner::new(MigrationManager::new(migrations), pool)
    }

    pub fn is_initialized(&self) -> bool {
        self.current().is_some()
    }

    /// Connect, verify the connection, build the models and check for
    /// migration drift.
    ///
    /// A second call while a session exists is ignored.
    pub async fn initialize(&self, config: DatabaseConfig) -> OrmResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.initialize_locked(config).await
    }

    async fn initialize_locked(&self, config: DatabaseConfig) -> OrmResult<()> {
        if self.current().is_some() {
            tracing::info!("Ignoring call to initialise database, already initialised");
            return Ok(());
        }

        config.validate()?;
        if config.verbose {
            tracing::info!(config = %config.redacted_pretty(), "Initialising database");
        }

        let pool = self
            .backend
            .create_pool(&config, ConnectionScope::Database, &self.options.pool)
            .await?;

        if let Err(err) = authenticate(pool.as_ref(), &self.options.retry).await {
            close_quietly(pool.as_ref(), "unauthenticated").await;
            return Err(err);
        }

        let models = match ModelRegistry::from_entities(&self.options.entities) {
            Ok(models) => Arc::new(models),
            Err(err) => {
                close_quietly(pool.as_ref(), "unused").await;
                return Err(err);
            }
        };

        check_drift(&self.migration_runner_for(&config, pool.clone())).await;

        tracing::info!(
            database = %config.name,
            endpoint = %config.endpoint(),
            backend = self.backend.name(),
            models = models.len(),
            "Database initialised"
        );

        self.replace_session(Some(Arc::new(Session { config, pool, models })));
        Ok(())
    }

    /// Configuration of the current session
    pub fn config(&self) -> OrmResult<DatabaseConfig> {
        Ok(self.session()?.config.clone())
    }

    /// Pool of the current session
    pub fn pool(&self) -> OrmResult<Arc<dyn DatabasePool>> {
        Ok(self.session()?.pool.clone())
    }

    /// Model registry of the current session
    pub fn models(&self) -> OrmResult<Arc<ModelRegistry>> {
        Ok(self.session()?.models.clone())
    }

    /// Resolve a model by canonical name or deprecated alias.
    /// Absent when the name is unknown or the runtime is not initialised.
    pub fn model(&self, name: &str) -> Option<ModelHandle> {
        self.current()?.models.get(name).cloned()
    }

    /// Migration runner bound to the current session
    pub fn migration_runner(&self) -> OrmResult<MigrationRunner> {
        let session = self.session()?;
        Ok(self.migration_runner_for(&session.config, session.pool.clone()))
    }

    /// Move the schema to `target` (usually [`MigrationTarget::Max`])
    pub async fn run_migrations(&self, target: MigrationTarget) -> OrmResult<MigrationRunResult> {
        self.migration_runner()?.migrate_to(target).await
    }

    /// Re-run the advisory drift check
    pub async fn check_migrations(&self) -> OrmResult<DriftReport> {
        Ok(check_drift(&self.migration_runner()?).await)
    }

    /// Run `work` in a transaction with the default retry options
    pub async fn with_transaction<T, F>(&self, work: F) -> OrmResult<T>
    where
        T: Send,
        F: for<'t> Fn(&'t mut dyn DatabaseTransaction) -> TransactionFuture<'t, T> + Send + Sync,
    {
        self.with_transaction_options(&self.options.transactions, work).await
    }

    /// Run `work` in a transaction with explicit retry options
    pub async fn with_transaction_options<T, F>(&self, options: &TransactionOptions, work: F) -> OrmResult<T>
    where
        T: Send,
        F: for<'t> Fn(&'t mut dyn DatabaseTransaction) -> TransactionFuture<'t, T> + Send + Sync,
    {
        let pool = self.pool()?;
        with_transaction(pool.as_ref(), options, work).await
    }

    /// Create and migrate a test database, then start a fresh session on it.
    ///
    /// Rejected configurations never reach the server.
    pub async fn setup_test_database(&self, config: DatabaseConfig) -> OrmResult<()> {
        let guard = self.guard();
        guard.enforce(&config)?;

        let _lifecycle = self.lifecycle.lock().await;

        let server = self
            .backend
            .create_pool(&config, ConnectionScope::Server, &DatabasePoolConfig::single())
            .await?;
        let created = testing::create_test_database(&guard, server.as_ref(), &config).await;
        close_quietly(server.as_ref(), "server").await;
        created?;

        let pool = self
            .backend
            .create_pool(&config, ConnectionScope::Database, &DatabasePoolConfig::single())
            .await?;
        let migrated = self
            .migration_runner_for(&config, pool.clone())
            .migrate_to(MigrationTarget::Max)
            .await;
        close_quietly(pool.as_ref(), "migration").await;
        let result = migrated?;

        tracing::info!(
            database = %config.name,
            version = result.to_version,
            executed = result.executed.len(),
            "Test database migrated"
        );

        if let Some(previous) = self.replace_session(None) {
            previous.pool.close().await?;
        }
        self.initialize_locked(config).await
    }

    /// Initialise against an existing test database
    pub async fn connect_to_test_database(&self, config: DatabaseConfig) -> OrmResult<()> {
        self.initialize(config).await
    }

    /// Empty every table of a test database.
    ///
    /// Works with or without a session: the wipe runs on its own
    /// single-connection pool. Rejected configurations never reach the server.
    pub async fn teardown_test_database(&self, config: DatabaseConfig) -> OrmResult<TeardownReport> {
        let guard = self.guard();
        guard.enforce(&config)?;

        let pool = self
            .backend
            .create_pool(&config, ConnectionScope::Database, &DatabasePoolConfig::single())
            .await?;
        let report = testing::teardown_test_database(&guard, pool.as_ref(), &config).await;
        close_quietly(pool.as_ref(), "teardown").await;
        report
    }

    /// Run one statement on a fresh server-level connection, outside the
    /// session pool
    pub async fn direct_query(&self, sql: &str) -> OrmResult<Vec<HashMap<String, JsonValue>>> {
        let config = self.config()?;
        let server = self
            .backend
            .create_pool(&config, ConnectionScope::Server, &DatabasePoolConfig::single())
            .await?;

        let rows = server.fetch_all(sql, &[]).await;
        close_quietly(server.as_ref(), "server").await;
        rows_to_maps(&rows?)
    }

    /// Close the pool and forget the session
    pub async fn close(&self) -> OrmResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        match self.replace_session(None) {
            Some(session) => session.pool.close().await,
            None => Ok(()),
        }
    }
}

/// Close a short-lived pool, logging instead of returning failures
async fn close_quietly(pool: &dyn DatabasePool, purpose: &str) {
    if let Err(err) = pool.close().await {
        tracing::debug!(pool = purpose, error = %err, "Failed to close pool");
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("migrations_dir", &self.options.migrations_dir)
            .field("backend", &self.backend.name())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::ValueRow;
    use crate::registry::FieldDefinition;
    use crate::test_support::{deadlock, MockPool};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Hands out the same scripted pool for every scope
    struct MockBackend {
        pool: MockPool,
        pools_created: AtomicUsize,
        scopes: std::sync::Mutex<Vec<ConnectionScope>>,
    }

    impl MockBackend {
        fn new(pool: &MockPool) -> Arc<Self> {
            Arc::new(Self {
                pool: pool.clone(),
                pools_created: AtomicUsize::new(0),
                scopes: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl DatabaseBackend for MockBackend {
        async fn create_pool(
            &self,
            _config: &DatabaseConfig,
            scope: ConnectionScope,
            _pool_config: &DatabasePoolConfig,
        ) -> OrmResult<Arc<dyn DatabasePool>> {
            self.pools_created.fetch_add(1, Ordering::SeqCst);
            self.scopes.lock().unwrap().push(scope);
            Ok(self.pool.as_pool())
        }

        fn name(&self) -> &'static str {
            "mock"
        }
    }

    struct Account;

    impl Entity for Account {
        fn name(&self) -> &str {
            "Account"
        }

        fn deprecated_names(&self) -> Vec<String> {
            vec!["User".to_string()]
        }

        fn fields(&self) -> Vec<FieldDefinition> {
            vec![FieldDefinition::id("id")]
        }
    }

    fn options(dir: &tempfile::TempDir) -> DatabaseOptions {
        DatabaseOptions::new(dir.path())
            .unwrap()
            .with_entity(Arc::new(Account))
            .with_retry_policy(RetryPolicy::new(2, Duration::from_secs(1)))
            .with_test_rules(TestDatabaseRules::default().returning_errors())
    }

    fn migrations_dir() -> tempfile::TempDir {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("001.do.accounts.sql"), "CREATE TABLE Account (id INT);").unwrap();
        dir
    }

    #[test]
    fn test_options_require_migrations_dir() {
        assert!(matches!(DatabaseOptions::new(""), Err(ModelError::Configuration(_))));
        assert!(matches!(DatabaseOptions::new("   "), Err(ModelError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_uninitialised_runtime() {
        let dir = migrations_dir();
        let pool = MockPool::new();
        let db = Database::with_backend(options(&dir), MockBackend::new(&pool));

        assert!(!db.is_initialized());
        assert!(db.model("Account").is_none());
        assert_eq!(db.config().unwrap_err(), ModelError::NotInitialized);
        assert!(matches!(db.run_migrations(MigrationTarget::Max).await, Err(ModelError::NotInitialized)));
        assert!(matches!(db.pool(), Err(ModelError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let dir = migrations_dir();
        let pool = MockPool::new();
        let backend = MockBackend::new(&pool);
        let db = Database::with_backend(options(&dir), backend.clone());

        db.initialize(DatabaseConfig::local("shop")).await.unwrap();
        db.initialize(DatabaseConfig::local("other")).await.unwrap();

        assert_eq!(backend.pools_created.load(Ordering::SeqCst), 1);
        assert_eq!(db.config().unwrap().name, "shop");
        assert_eq!(pool.health_checks(), 1);

        let account: ModelHandle = db.model("Account").unwrap();
        assert!(Arc::ptr_eq(&account, &db.model("User").unwrap()));
        assert_eq!(db.models().unwrap().keys().collect::<Vec<_>>(), vec!["Account"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_fails_when_database_unreachable() {
        let dir = migrations_dir();
        let pool = MockPool::new();
        pool.fail_health_checks(usize::MAX);
        let db = Database::with_backend(options(&dir), MockBackend::new(&pool));

        let err = db.initialize(DatabaseConfig::local("shop")).await.unwrap_err();
        assert!(matches!(err, ModelError::Connection(_)));
        assert_eq!(pool.health_checks(), 3);
        assert!(!db.is_initialized());
        assert!(pool.is_closed());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_connecting() {
        let dir = migrations_dir();
        let pool = MockPool::new();
        let backend = MockBackend::new(&pool);
        let db = Database::with_backend(options(&dir), backend.clone());

        let err = db.initialize(DatabaseConfig::local("")).await.unwrap_err();
        assert!(matches!(err, ModelError::Configuration(_)));
        assert_eq!(backend.pools_created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_transaction_uses_session_pool() {
        let dir = migrations_dir();
        let pool = MockPool::new();
        pool.fail_times("UPDATE", 1, deadlock());
        let db = Database::with_backend(options(&dir), MockBackend::new(&pool));
        db.initialize(DatabaseConfig::local("shop")).await.unwrap();

        let value = db
            .with_transaction(|tx| Box::pin(async move { tx.execute("UPDATE Account SET id = id", &[]).await.map(|_| 7) }))
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(pool.count("COMMIT"), 1);
        assert_eq!(pool.count("ROLLBACK"), 1);
    }

    #[tokio::test]
    async fn test_setup_test_database_creates_migrates_and_initialises() {
        let dir = migrations_dir();
        let pool = MockPool::new();
        let backend = MockBackend::new(&pool);
        let db = Database::with_backend(options(&dir), backend.clone());

        db.setup_test_database(DatabaseConfig::local("shop_test")).await.unwrap();

        let log = pool.log();
        let position = |needle: &str| log.iter().position(|sql| sql.contains(needle)).unwrap();
        assert!(position("CREATE DATABASE IF NOT EXISTS `shop_test`") < position("SET GLOBAL sql_mode"));
        assert!(position("SET GLOBAL sql_mode") < position("CREATE TABLE Account"));
        assert!(db.is_initialized());
        assert_eq!(
            *backend.scopes.lock().unwrap(),
            vec![ConnectionScope::Server, ConnectionScope::Database, ConnectionScope::Database]
        );
    }

    #[tokio::test]
    async fn test_setup_rejects_production_config_without_side_effects() {
        let dir = migrations_dir();
        let pool = MockPool::new();
        let backend = MockBackend::new(&pool);
        let db = Database::with_backend(options(&dir), backend.clone());

        let err = db
            .setup_test_database(DatabaseConfig::new("shop", "db.prod.internal", "app", "s3cret"))
            .await
            .unwrap_err();

        assert!(matches!(err, ModelError::UnsafeTarget(ref msg) if !msg.contains("s3cret")));
        assert_eq!(backend.pools_created.load(Ordering::SeqCst), 0);
        assert!(pool.log().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_runs_without_a_session() {
        let dir = migrations_dir();
        let pool = MockPool::new();
        pool.respond(
            "information_schema.tables",
            vec![ValueRow::new().with("table_name", "Account")],
        );
        let backend = MockBackend::new(&pool);
        let db = Database::with_backend(options(&dir), backend.clone());

        let report = db.teardown_test_database(DatabaseConfig::local("shop_test")).await.unwrap();

        assert_eq!(report.tables, vec!["Account"]);
        assert_eq!(pool.count("DELETE FROM `shop_test`.`Account`"), 1);
        assert_eq!(pool.health_checks(), 0);
        assert_eq!(*backend.scopes.lock().unwrap(), vec![ConnectionScope::Database]);
        assert!(pool.is_closed());
        assert!(!db.is_initialized());
    }

    #[tokio::test]
    async fn test_teardown_rejects_before_touching_the_server() {
        let dir = migrations_dir();
        let pool = MockPool::new();
        let backend = MockBackend::new(&pool);
        let db = Database::with_backend(options(&dir), backend.clone());

        let err = db
            .teardown_test_database(DatabaseConfig::new("orders", "db.prod.internal", "app", "s3cret"))
            .await
            .unwrap_err();

        assert!(matches!(err, ModelError::UnsafeTarget(_)));
        assert_eq!(backend.pools_created.load(Ordering::SeqCst), 0);
        assert_eq!(pool.health_checks(), 0);
        assert!(pool.log().is_empty());
    }

    #[tokio::test]
    async fn test_pool_close_failures_are_not_fatal() {
        let dir = migrations_dir();
        let pool = MockPool::new();
        pool.fail_close();
        pool.respond("SHOW DATABASES", vec![ValueRow::new().with("Database", "shop_test")]);
        let db = Database::with_backend(options(&dir), MockBackend::new(&pool));

        db.setup_test_database(DatabaseConfig::local("shop_test")).await.unwrap();
        assert!(db.is_initialized());
        assert_eq!(db.direct_query("SHOW DATABASES").await.unwrap().len(), 1);
        assert!(db.teardown_test_database(DatabaseConfig::local("shop_test")).await.is_ok());
    }

    #[tokio::test]
    async fn test_direct_query_and_close() {
        let dir = migrations_dir();
        let pool = MockPool::new();
        pool.respond("SHOW DATABASES", vec![ValueRow::new().with("Database", "shop")]);
        let backend = MockBackend::new(&pool);
        let db = Database::with_backend(options(&dir), backend.clone());
        db.initialize(DatabaseConfig::local("shop")).await.unwrap();

        let rows = db.direct_query("SHOW DATABASES").await.unwrap();
        assert_eq!(rows[0]["Database"], "shop");
        assert_eq!(backend.scopes.lock().unwrap().last(), Some(&ConnectionScope::Server));

        db.close().await.unwrap();
        assert!(!db.is_initialized());
        assert!(pool.is_closed());
    }
}
