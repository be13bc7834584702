//! Repository that remembers nothing

use super::DependencyRepository;
use crate::error::Result;
use crate::types::{DependencySpec, PackageRecord};
use async_trait::async_trait;

/// Repository that never stores anything
///
/// Every dependency is reported as needing a download. Useful for a full
/// one-shot mirror of an acyclic catalogue; resolution does not terminate on a
/// dependency cycle because nothing is ever marked as seen.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyRepository;

impl EmptyRepository {
    /// Create a new empty repository
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DependencyRepository for EmptyRepository {
    async fn should_download(&self, _spec: &DependencySpec) -> Result<bool> {
        Ok(true)
    }

    async fn add_records(&self, records: &[PackageRecord]) -> Result<()> {
        tracing::trace!(batch = records.len(), "Discarding package records");
        Ok(())
    }

    async fn exists(&self, _record: &PackageRecord) -> Result<bool> {
        Ok(false)
    }

    fn name(&self) -> &'static str {
        "empty"
    }
}
