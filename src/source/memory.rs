//! In-memory package catalogue

use super::{PackageSource, PageRequest, best_match, latest};
use crate::error::{Result, SourceError};
use crate::types::{
    DependencySet, DependencySpec, PackageDescription, PackageIdentity, PackageRecord,
    PackageSummary, VersionRange,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct CatalogueEntry {
    description: PackageDescription,
    published: DateTime<Utc>,
}

/// A fixed package catalogue held in memory
///
/// Built up front with [`with_package`](Self::with_package) /
/// [`with_description`](Self::with_description) and immutable afterwards, so
/// it can be shared across tasks without locking. Ids are matched
/// case-insensitively, like gallery ids.
///
/// # Examples
///
/// ```
/// use gallery_sync::source::MemorySource;
/// use chrono::Utc;
///
/// # fn main() -> gallery_sync::Result<()> {
/// let source = MemorySource::new()
///     .with_package("A", "1.0.0", Utc::now(), &[("C", Some(">=1.0.0"))])?
///     .with_package("C", "1.2.0", Utc::now(), &[])?;
/// assert_eq!(source.len(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    packages: BTreeMap<String, Vec<CatalogueEntry>>,
}

impl MemorySource {
    /// An empty catalogue
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a package version with framework-agnostic dependencies
    ///
    /// Each dependency is `(id, optional range)`.
    pub fn with_package(
        self,
        id: &str,
        version: &str,
        published: DateTime<Utc>,
        dependencies: &[(&str, Option<&str>)],
    ) -> Result<Self> {
        let identity = PackageIdentity::parse(id, version)?;
        let dependencies = dependencies
            .iter()
            .map(|(dep, range)| DependencySpec::parse(dep, *range))
            .collect::<Result<Vec<_>>>()?;

        let dependency_sets = if dependencies.is_empty() {
            Vec::new()
        } else {
            vec![DependencySet {
                framework: None,
                dependencies,
            }]
        };

        Ok(self.with_description(
            PackageDescription {
                identity,
                dependency_sets,
            },
            published,
        ))
    }

    /// Add a fully described package version
    pub fn with_description(
        mut self,
        description: PackageDescription,
        published: DateTime<Utc>,
    ) -> Self {
        let versions = self
            .packages
            .entry(description.identity.id.to_lowercase())
            .or_default();
        versions.retain(|e| e.description.identity.version != description.identity.version);
        versions.push(CatalogueEntry {
            description,
            published,
        });
        self
    }

    /// Number of package versions in the catalogue
    pub fn len(&self) -> usize {
        self.packages.values().map(Vec::len).sum()
    }

    /// Whether the catalogue is empty
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    fn versions_of(&self, id: &str) -> Option<&Vec<CatalogueEntry>> {
        self.packages.get(&id.to_lowercase())
    }
}

#[async_trait]
impl PackageSource for MemorySource {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<PackageSummary>> {
        let mut matching: Vec<&CatalogueEntry> = self
            .packages
            .values()
            .flatten()
            .filter(|e| e.published >= request.since)
            .filter(|e| request.until.is_none_or(|until| e.published < until))
            .filter(|e| request.include_prerelease || !e.description.identity.is_prerelease())
            .collect();

        // Stable order so skip/take paging is deterministic
        matching.sort_by(|a, b| {
            a.published
                .cmp(&b.published)
                .then_with(|| a.description.identity.id.cmp(&b.description.identity.id))
                .then_with(|| {
                    a.description
                        .identity
                        .version
                        .cmp(&b.description.identity.version)
                })
        });

        Ok(matching
            .into_iter()
            .skip(request.skip)
            .take(request.take)
            .map(|e| PackageSummary {
                identity: e.description.identity.clone(),
                published: e.published,
            })
            .collect())
    }

    async fn fetch_package_description(
        &self,
        identity: &PackageIdentity,
    ) -> Result<PackageDescription> {
        self.versions_of(&identity.id)
            .and_then(|versions| {
                versions
                    .iter()
                    .find(|e| e.description.identity.version == identity.version)
            })
            .map(|e| e.description.clone())
            .ok_or_else(|| SourceError::PackageNotFound(identity.to_string()).into())
    }

    async fn find_best_match(
        &self,
        id: &str,
        range: &VersionRange,
        allow_prerelease: bool,
    ) -> Result<Option<PackageRecord>> {
        let Some(versions) = self.versions_of(id) else {
            return Ok(None);
        };
        let found = best_match(
            versions.iter().map(|e| &e.description.identity.version),
            range,
            allow_prerelease,
        );
        Ok(found.and_then(|v| record_for(versions, v)))
    }

    async fn find_latest(&self, id: &str) -> Result<Option<PackageRecord>> {
        let Some(versions) = self.versions_of(id) else {
            return Ok(None);
        };
        let found = latest(versions.iter().map(|e| &e.description.identity.version));
        Ok(found.and_then(|v| record_for(versions, v)))
    }
}

fn record_for(versions: &[CatalogueEntry], version: &semver::Version) -> Option<PackageRecord> {
    versions
        .iter()
        .find(|e| &e.description.identity.version == version)
        .map(|e| PackageRecord::new(e.description.identity.clone()))
}
