//! Dependency resolution against a package source
//!
//! [`DependencyResolver`] turns one package into the records of its direct
//! dependencies that are not yet in the repository. It does not recurse; the
//! pipeline feeds every returned record back in, so each level of the graph
//! resolves concurrently and depth is bounded only by the graph itself.

use crate::config::SourceConfig;
use crate::error::Result;
use crate::repository::DependencyRepository;
use crate::source::PackageSource;
use crate::types::{DependencySpec, PackageDescription, PackageIdentity, PackageRecord};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;

/// Resolves declared dependencies to concrete package records
#[derive(Clone)]
pub struct DependencyResolver {
    source: Arc<dyn PackageSource>,
    repository: Arc<dyn DependencyRepository>,
    config: SourceConfig,
}

impl DependencyResolver {
    /// Create a resolver over a source and a repository
    pub fn new(
        source: Arc<dyn PackageSource>,
        repository: Arc<dyn DependencyRepository>,
        config: &SourceConfig,
    ) -> Self {
        Self {
            source,
            repository,
            config: config.clone(),
        }
    }

    /// Resolve one declared dependency to a concrete version
    ///
    /// Lookup order:
    /// 1. no range: the latest version (stable preferred)
    /// 2. the highest stable version inside the range
    /// 3. the highest version inside the range, pre-releases allowed
    ///
    /// Returns `Ok(None)` when nothing matches; the dependency is dropped and
    /// logged at error level.
    pub async fn resolve_spec(&self, spec: &DependencySpec) -> Result<Option<PackageRecord>> {
        let found = match &spec.version_range {
            None => self.source.find_latest(&spec.package_id).await?,
            Some(range) => {
                match self
                    .source
                    .find_best_match(&spec.package_id, range, false)
                    .await?
                {
                    Some(record) => Some(record),
                    None => {
                        let fallback = self
                            .source
                            .find_best_match(&spec.package_id, range, true)
                            .await?;
                        if let Some(record) = &fallback {
                            tracing::debug!(
                                dependency = %spec,
                                resolved = %record.identity,
                                "No stable release satisfies range, using pre-release"
                            );
                        }
                        fallback
                    }
                }
            }
        };

        if found.is_none() {
            tracing::error!(
                package_id = %spec.package_id,
                dependency = %spec,
                "Dependency could not be resolved, dropping it"
            );
        }
        Ok(found)
    }

    /// Resolve the direct dependencies of `package` that still need a download
    ///
    /// Dependency sets of every accepted target framework are merged. Specs the
    /// repository already satisfies are skipped. With `update_repository` the
    /// surviving records are stored as one batch before returning.
    ///
    /// A lookup failure for one dependency drops only that dependency.
    ///
    /// # Errors
    ///
    /// Fails if the description of `package` cannot be fetched, or on any
    /// repository error.
    pub async fn resolve_dependencies(
        &self,
        package: &PackageIdentity,
        update_repository: bool,
    ) -> Result<Vec<PackageRecord>> {
        let description = self.source.fetch_package_description(package).await?;
        let specs = self.declared_dependencies(&description);

        let lookups = specs.iter().map(|spec| self.lookup(spec));
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for result in join_all(lookups).await {
            if let Some(record) = result?
                && seen.insert(record.identity.clone())
            {
                records.push(record);
            }
        }

        if update_repository && !records.is_empty() {
            self.repository.add_records(&records).await?;
        }

        tracing::debug!(
            package = %package,
            declared = specs.len(),
            resolved = records.len(),
            "Resolved dependencies"
        );

        Ok(records)
    }

    /// should-download check followed by the defensive lookup
    async fn lookup(&self, spec: &DependencySpec) -> Result<Option<PackageRecord>> {
        if !self.repository.should_download(spec).await? {
            return Ok(None);
        }
        match self.resolve_spec(spec).await {
            Ok(found) => Ok(found),
            Err(e) if e.is_branch_local() => {
                tracing::warn!(
                    dependency = %spec,
                    error = %e,
                    "Dependency lookup failed, dropping it"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Union of dependency specs across accepted frameworks, duplicates collapsed
    fn declared_dependencies(&self, description: &PackageDescription) -> Vec<DependencySpec> {
        let mut seen = HashSet::new();
        description
            .dependency_sets
            .iter()
            .filter(|set| self.config.accepts_framework(set.framework.as_deref()))
            .flat_map(|set| set.dependencies.iter())
            .filter(|spec| {
                seen.insert((
                    spec.package_id.to_lowercase(),
                    spec.version_range.as_ref().map(ToString::to_string),
                ))
            })
            .cloned()
            .collect()
    }
}
