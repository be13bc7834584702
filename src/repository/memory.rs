//! In-process repository

use super::DependencyRepository;
use crate::error::Result;
use crate::types::{DependencySpec, PackageRecord};
use async_trait::async_trait;
use semver::Version;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

/// Repository held in memory for the lifetime of the process
///
/// Ids are compared case-insensitively. Reads share the lock; a batch write
/// holds it exclusively for the duration of the insert only.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    versions: RwLock<HashMap<String, BTreeSet<Version>>>,
}

impl MemoryRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored identities
    pub async fn len(&self) -> usize {
        self.versions.read().await.values().map(BTreeSet::len).sum()
    }

    /// Whether nothing is stored
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DependencyRepository for MemoryRepository {
    async fn should_download(&self, spec: &DependencySpec) -> Result<bool> {
        let versions = self.versions.read().await;
        let satisfied = versions
            .get(&spec.package_id.to_lowercase())
            .is_some_and(|stored| stored.iter().any(|v| spec.is_satisfied_by(v)));
        Ok(!satisfied)
    }

    async fn add_records(&self, records: &[PackageRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut versions = self.versions.write().await;
        for record in records {
            versions
                .entry(record.id().to_lowercase())
                .or_default()
                .insert(record.version().clone());
        }
        tracing::trace!(batch = records.len(), "Stored package records in memory");
        Ok(())
    }

    async fn exists(&self, record: &PackageRecord) -> Result<bool> {
        let versions = self.versions.read().await;
        Ok(versions
            .get(&record.id().to_lowercase())
            .is_some_and(|stored| stored.contains(record.version())))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
