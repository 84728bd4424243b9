//! Migration drift detection
//!
//! Compares the newest migration on disk with the newest one recorded in
//! the database. Purely advisory: problems are logged, never returned.

use std::fmt;

use serde::Serialize;

use super::definitions::MigrationSource;

const BANNER: &str = "*************************************************";

/// Highest available and applied versions, derived fresh on every check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MigrationVersionPair {
    pub available_max_version: i64,
    pub applied_database_version: i64,
}

/// How the two versions relate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriftStatus {
    InSync,
    /// Applied version is behind what is available
    DatabaseBehind,
    /// Applied version is ahead of what this build ships
    PackageBehind,
}

impl DriftStatus {
    fn classify(versions: MigrationVersionPair) -> Self {
        use std::cmp::Ordering;

        match versions.applied_database_version.cmp(&versions.available_max_version) {
            Ordering::Equal => DriftStatus::InSync,
            Ordering::Less => DriftStatus::DatabaseBehind,
            Ordering::Greater => DriftStatus::PackageBehind,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DriftStatus::InSync => "database schema is up to date",
            DriftStatus::DatabaseBehind => "database needs migrating",
            DriftStatus::PackageBehind => "installed package is older than deployed schema",
        }
    }
}

impl fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Outcome of [`check_drift`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DriftReport {
    Determined {
        versions: MigrationVersionPair,
        status: DriftStatus,
    },
    /// Versions could not be read, e.g. the bookkeeping table is missing
    Undetermined { reason: String },
}

impl DriftReport {
    pub fn in_sync(&self) -> bool {
        matches!(self, DriftReport::Determined { status: DriftStatus::InSync, .. })
    }

    pub fn status(&self) -> Option<DriftStatus> {
        match self {
            DriftReport::Determined { status, .. } => Some(*status),
            DriftReport::Undetermined { .. } => None,
        }
    }

    pub fn versions(&self) -> Option<MigrationVersionPair> {
        match self {
            DriftReport::Determined { versions, .. } => Some(*versions),
            DriftReport::Undetermined { .. } => None,
        }
    }
}

/// Compare available and applied versions and warn on any divergence
pub async fn check_drift(source: &dyn MigrationSource) -> DriftReport {
    let versions = async {
        let available_max_version = source.max_version().await?;
        let applied_database_version = source.applied_version().await?;
        Ok::<_, crate::error::OrmError>(MigrationVersionPair {
            available_max_version,
            applied_database_version,
        })
    }
    .await;

    let versions = match versions {
        Ok(versions) => versions,
        Err(err) => {
            tracing::warn!(
                error = %err,
                "\n{BANNER}\n{BANNER}\nCould not check database schema version!\n{BANNER}\n{BANNER}"
            );
            return DriftReport::Undetermined { reason: err.to_string() };
        }
    };

    let status = DriftStatus::classify(versions);
    match status {
        DriftStatus::InSync => {
            tracing::debug!(version = versions.applied_database_version, "Database schema is up to date");
        }
        DriftStatus::DatabaseBehind | DriftStatus::PackageBehind => {
            let headline = if status == DriftStatus::DatabaseBehind {
                "The database is out of date and needs to be migrated!"
            } else {
                "The installed package is out of date and should be updated!"
            };
            tracing::warn!(
                applied_version = versions.applied_database_version,
                available_version = versions.available_max_version,
                status = %status,
                "\n{BANNER}\n{BANNER}\n{headline}\n{BANNER}\nLatest migration version on database: {}\nLatest migration version available is: {}\n{BANNER}\n{BANNER}",
                versions.applied_database_version,
                versions.available_max_version
            );
        }
    }

    DriftReport::Determined { versions, status }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{OrmError, OrmResult};
    use crate::migrations::{MigrationRunResult, MigrationTarget};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSource {
        available: OrmResult<i64>,
        applied: OrmResult<i64>,
        migrations_run: AtomicUsize,
    }

    impl FixedSource {
        fn new(available: OrmResult<i64>, applied: OrmResult<i64>) -> Self {
            Self {
                available,
                applied,
                migrations_run: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MigrationSource for FixedSource {
        async fn max_version(&self) -> OrmResult<i64> {
            self.available.clone()
        }

        async fn applied_version(&self) -> OrmResult<i64> {
            self.applied.clone()
        }

        async fn migrate_to(&self, _target: MigrationTarget) -> OrmResult<MigrationRunResult> {
            self.migrations_run.fetch_add(1, Ordering::SeqCst);
            Err(OrmError::Migration("not expected".to_string()))
        }
    }

    #[tokio::test]
    async fn test_database_behind() {
        let source = FixedSource::new(Ok(5), Ok(3));
        let report = check_drift(&source).await;

        assert!(!report.in_sync());
        assert_eq!(report.status(), Some(DriftStatus::DatabaseBehind));
        assert_eq!(report.status().unwrap().description(), "database needs migrating");
        assert_eq!(
            report.versions(),
            Some(MigrationVersionPair {
                available_max_version: 5,
                applied_database_version: 3
            })
        );
        assert_eq!(source.migrations_run.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_package_behind_and_in_sync() {
        let report = check_drift(&FixedSource::new(Ok(2), Ok(4))).await;
        assert_eq!(report.status(), Some(DriftStatus::PackageBehind));

        let report = check_drift(&FixedSource::new(Ok(4), Ok(4))).await;
        assert!(report.in_sync());
    }

    #[tokio::test]
    async fn test_version_failure_is_soft() {
        let missing_table = OrmError::Database("ER_NO_SUCH_TABLE: Table 'app.schemaversion' doesn't exist".to_string());
        let report = check_drift(&FixedSource::new(Ok(5), Err(missing_table))).await;

        assert!(matches!(report, DriftReport::Undetermined { ref reason } if reason.contains("ER_NO_SUCH_TABLE")));
        assert!(!report.in_sync());
        assert_eq!(report.status(), None);

        let report = check_drift(&FixedSource::new(Err(OrmError::Migration("bad dir".into())), Ok(1))).await;
        assert!(matches!(report, DriftReport::Undetermined { .. }));
    }
}
