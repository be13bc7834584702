//! Stored package records: batch inserts and version lookups.

use crate::error::DatabaseError;
use crate::types::{PackageIdentity, PackageRecord};
use crate::{Error, Result};
use semver::Version;

use super::{Database, PackageRow};

impl Database {
    /// Insert a batch of records in a single transaction
    ///
    /// Records whose id (case-insensitive) and version are already stored are
    /// skipped. Returns the number of rows actually inserted.
    pub async fn insert_packages(&self, records: &[PackageRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let mut inserted = 0;
        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO packages (key, package_id, package_id_lower, version, inserted_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(package_id_lower, version) DO NOTHING
                "#,
            )
            .bind(record.formatted_key())
            .bind(record.id())
            .bind(record.id().to_lowercase())
            .bind(record.version().to_string())
            .bind(record.inserted_at.timestamp())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert package {}: {}",
                    record.identity, e
                )))
            })?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit package batch: {}",
                e
            )))
        })?;

        tracing::debug!(
            batch = records.len(),
            inserted,
            "Stored package records"
        );

        Ok(inserted)
    }

    /// Check if a package version is stored
    pub async fn package_exists(&self, identity: &PackageIdentity) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM packages WHERE package_id_lower = ? AND version = ?",
        )
        .bind(identity.id.to_lowercase())
        .bind(identity.version.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to check if package exists: {}",
                e
            )))
        })?;

        Ok(count > 0)
    }

    /// All stored versions of a package id (case-insensitive)
    ///
    /// Rows with an unparsable version are skipped.
    pub async fn versions_of(&self, package_id: &str) -> Result<Vec<Version>> {
        let raw: Vec<String> =
            sqlx::query_scalar("SELECT version FROM packages WHERE package_id_lower = ?")
                .bind(package_id.to_lowercase())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to list versions of {}: {}",
                        package_id, e
                    )))
                })?;

        Ok(raw
            .into_iter()
            .filter_map(|v| match Version::parse(&v) {
                Ok(version) => Some(version),
                Err(e) => {
                    tracing::warn!(
                        package = %package_id,
                        version = %v,
                        error = %e,
                        "Skipping stored version"
                    );
                    None
                }
            })
            .collect())
    }

    /// Get a stored record by id (case-insensitive) and version
    pub async fn get_package(&self, identity: &PackageIdentity) -> Result<Option<PackageRecord>> {
        let row = sqlx::query_as::<_, PackageRow>(
            "SELECT key, package_id, version, inserted_at FROM packages \
             WHERE package_id_lower = ? AND version = ?",
        )
        .bind(identity.id.to_lowercase())
        .bind(identity.version.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get package: {}",
                e
            )))
        })?;

        row.map(PackageRecord::try_from).transpose()
    }

    /// Number of stored records
    pub async fn package_count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM packages")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count packages: {}",
                    e
                )))
            })
    }
}
