//! Dependency repository
//!
//! The repository remembers which packages have already been discovered so the
//! pipeline does not resolve or download them twice. It is the single source of
//! truth for de-duplication; there is no in-memory visited set on top of it.
//!
//! Three implementations ship with the crate:
//!
//! - [`Database`](crate::db::Database): SQLite, survives across runs
//! - [`MemoryRepository`]: lives for one process, useful for one-off runs and tests
//! - [`EmptyRepository`]: remembers nothing, every dependency is downloaded
//!
//! Writes for one batch happen-before any `should_download` check issued after
//! the write returns. Checks racing an in-flight write may both see "not yet
//! stored", which only causes duplicate resolution work.

mod empty;
mod memory;

pub use empty::EmptyRepository;
pub use memory::MemoryRepository;

use crate::db::Database;
use crate::error::Result;
use crate::types::{DependencySpec, PackageRecord};
use async_trait::async_trait;

/// Trait for the de-duplication store
#[async_trait]
pub trait DependencyRepository: Send + Sync {
    /// Whether no stored record satisfies `spec` yet
    async fn should_download(&self, spec: &DependencySpec) -> Result<bool>;

    /// Store one record
    async fn add_record(&self, record: &PackageRecord) -> Result<()> {
        self.add_records(std::slice::from_ref(record)).await
    }

    /// Store a batch of records as a unit
    ///
    /// Records already stored are ignored.
    async fn add_records(&self, records: &[PackageRecord]) -> Result<()>;

    /// Whether this exact identity is stored
    async fn exists(&self, record: &PackageRecord) -> Result<bool>;

    /// Get the name of this implementation
    fn name(&self) -> &'static str;
}

#[async_trait]
impl DependencyRepository for Database {
    async fn should_download(&self, spec: &DependencySpec) -> Result<bool> {
        let stored = self.versions_of(&spec.package_id).await?;
        Ok(!stored.iter().any(|v| spec.is_satisfied_by(v)))
    }

    async fn add_records(&self, records: &[PackageRecord]) -> Result<()> {
        self.insert_packages(records).await.map(|_| ())
    }

    async fn exists(&self, record: &PackageRecord) -> Result<bool> {
        self.package_exists(&record.identity).await
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_database_should_download() {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).await.unwrap();
        let repo: &dyn DependencyRepository = &db;

        let spec = DependencySpec::parse("Serilog", Some(">=2.0.0")).unwrap();
        assert!(repo.should_download(&spec).await.unwrap());

        repo.add_record(&PackageRecord::parse("Serilog", "1.5.0").unwrap())
            .await
            .unwrap();
        assert!(
            repo.should_download(&spec).await.unwrap(),
            "1.5.0 does not satisfy >=2.0.0"
        );

        repo.add_record(&PackageRecord::parse("serilog", "2.12.0").unwrap())
            .await
            .unwrap();
        assert!(!repo.should_download(&spec).await.unwrap());

        db.close().await;
    }

    #[tokio::test]
    async fn test_database_unconstrained_spec_satisfied_by_any_version() {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).await.unwrap();

        let spec = DependencySpec::parse("Polly", None).unwrap();
        assert!(db.should_download(&spec).await.unwrap());

        db.add_records(&[PackageRecord::parse("Polly", "7.2.4").unwrap()])
            .await
            .unwrap();
        assert!(!db.should_download(&spec).await.unwrap());

        db.close().await;
    }

    #[tokio::test]
    async fn test_database_exists_and_idempotent_add() {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::new(temp_file.path()).await.unwrap();

        let record = PackageRecord::parse("A", "1.0.0").unwrap();
        assert!(!DependencyRepository::exists(&db, &record).await.unwrap());

        db.add_records(&[record.clone(), record.clone()]).await.unwrap();
        db.add_record(&record).await.unwrap();

        assert!(DependencyRepository::exists(&db, &record).await.unwrap());
        assert_eq!(db.package_count().await.unwrap(), 1);
        assert_eq!(db.name(), "sqlite");

        db.close().await;
    }
}
