//! Package gallery access
//!
//! [`PackageSource`] is the seam to the package gallery. Two implementations
//! ship with the crate:
//!
//! - [`GalleryClient`]: JSON over HTTP against a gallery endpoint
//! - [`MemorySource`]: a fixed in-memory catalogue for offline runs and tests
//!
//! [`PageStream`] drives a source page by page for the feed stage of the
//! pipeline, applying the page timeout and retry policy.

mod gallery;
mod memory;
mod stream;

pub use gallery::GalleryClient;
pub use memory::MemorySource;
pub use stream::PageStream;

use crate::error::Result;
use crate::types::{
    PackageDescription, PackageIdentity, PackageRecord, PackageSummary, VersionRange,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use semver::Version;

/// One page of the gallery feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Only packages published at or after this instant
    pub since: DateTime<Utc>,
    /// Only packages published before this instant (None = no upper bound)
    pub until: Option<DateTime<Utc>>,
    /// Entries to skip
    pub skip: usize,
    /// Entries to return at most
    pub take: usize,
    /// Whether pre-release versions are returned
    pub include_prerelease: bool,
}

/// Trait for a package gallery
///
/// "Not found" is not an error for the lookup methods: they return
/// `Ok(None)` so the resolver can fall back or drop the dependency.
#[async_trait]
pub trait PackageSource: Send + Sync {
    /// Fetch one page of recently published packages
    ///
    /// An empty page means the feed is exhausted.
    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<PackageSummary>>;

    /// Fetch the dependency sets of one package version
    ///
    /// # Errors
    ///
    /// Returns `SourceError::PackageNotFound` if the gallery does not know the
    /// package version.
    async fn fetch_package_description(
        &self,
        identity: &PackageIdentity,
    ) -> Result<PackageDescription>;

    /// Highest version of `id` satisfying `range`
    ///
    /// Pre-release versions are only considered with `allow_prerelease`.
    async fn find_best_match(
        &self,
        id: &str,
        range: &VersionRange,
        allow_prerelease: bool,
    ) -> Result<Option<PackageRecord>>;

    /// Latest version of `id`, preferring stable releases
    ///
    /// Falls back to the latest pre-release when no stable release exists.
    async fn find_latest(&self, id: &str) -> Result<Option<PackageRecord>>;
}

/// Highest version satisfying `range`
pub(crate) fn best_match<'a>(
    versions: impl IntoIterator<Item = &'a Version>,
    range: &VersionRange,
    allow_prerelease: bool,
) -> Option<&'a Version> {
    versions
        .into_iter()
        .filter(|v| allow_prerelease || v.pre.is_empty())
        .filter(|v| range.matches(v, allow_prerelease))
        .max()
}

/// Highest stable version, else highest pre-release
pub(crate) fn latest<'a>(versions: impl IntoIterator<Item = &'a Version>) -> Option<&'a Version> {
    let mut stable: Option<&Version> = None;
    let mut any: Option<&Version> = None;
    for version in versions {
        if version.pre.is_empty() && stable.is_none_or(|s| version > s) {
            stable = Some(version);
        }
        if any.is_none_or(|a| version > a) {
            any = Some(version);
        }
    }
    stable.or(any)
}
