//! Page-by-page feed reader

use super::{PackageSource, PageRequest};
use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::retry::with_retry;
use crate::types::PackageSummary;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Reads the gallery feed one page at a time
///
/// Pages are requested with `skip = n * page_size`. Each request is bounded
/// by `page_timeout`; timeouts and transient failures are retried according
/// to `page_retry`. The first empty page ends the feed.
///
/// Pre-release entries are dropped unless pre-releases are enabled or the
/// package id is allow-listed. A page whose entries were all dropped is
/// returned empty without ending the feed.
pub struct PageStream {
    source: Arc<dyn PackageSource>,
    config: SourceConfig,
    since: DateTime<Utc>,
    until: Option<DateTime<Utc>>,
    next_skip: usize,
    pages: usize,
    exhausted: bool,
}

impl PageStream {
    /// Start reading packages published at or after `since`
    pub fn new(
        source: Arc<dyn PackageSource>,
        config: &SourceConfig,
        since: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            config: config.clone(),
            since,
            until: None,
            next_skip: 0,
            pages: 0,
            exhausted: false,
        }
    }

    /// Only read packages published before `until`
    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Pages fetched so far
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// Whether the feed has ended
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fetch the next page, or `None` once the feed is exhausted
    ///
    /// # Errors
    ///
    /// Returns the last error once the retry policy gives up, or the first
    /// non-retryable error.
    pub async fn next_page(&mut self) -> Result<Option<Vec<PackageSummary>>> {
        if self.exhausted {
            return Ok(None);
        }

        let request = PageRequest {
            since: self.since,
            until: self.until,
            skip: self.next_skip,
            take: self.config.page_size,
            include_prerelease: self.config.include_prerelease
                || !self.config.prerelease_allowlist.is_empty(),
        };
        let timeout = self.config.page_timeout;
        let source = &self.source;
        let request = &request;

        let page = with_retry(&self.config.page_retry, || async move {
            tokio::time::timeout(timeout, source.fetch_page(request))
                .await
                .map_err(|_| Error::Timeout(timeout))?
        })
        .await?;

        if page.is_empty() {
            tracing::info!(
                pages = self.pages,
                skip = self.next_skip,
                "Gallery feed exhausted"
            );
            self.exhausted = true;
            return Ok(None);
        }

        self.pages += 1;
        self.next_skip += page.len();

        let total = page.len();
        let accepted: Vec<PackageSummary> = page
            .into_iter()
            .filter(|summary| {
                !summary.identity.is_prerelease()
                    || self.config.allows_prerelease(&summary.identity.id)
            })
            .collect();

        tracing::debug!(
            page = self.pages,
            entries = total,
            accepted = accepted.len(),
            "Read gallery page"
        );

        Ok(Some(accepted))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::SourceError;
    use crate::source::MemorySource;
    use crate::types::{PackageDescription, PackageIdentity, PackageRecord, VersionRange};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn fast_config(page_size: usize) -> SourceConfig {
        SourceConfig {
            page_size,
            page_timeout: std::time::Duration::from_millis(200),
            page_retry: RetryConfig {
                max_attempts: None,
                initial_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(5),
                backoff_multiplier: 2.0,
                jitter: false,
            },
            ..Default::default()
        }
    }

    /// Fails (or stalls) the first `failures` page requests, then delegates
    struct Flaky {
        inner: MemorySource,
        failures: usize,
        stall: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PackageSource for Flaky {
        async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<PackageSummary>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                if self.stall {
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                }
                return Err(SourceError::Http {
                    status: 503,
                    url: "memory://packages".into(),
                }
                .into());
            }
            self.inner.fetch_page(request).await
        }

        async fn fetch_package_description(
            &self,
            identity: &PackageIdentity,
        ) -> Result<PackageDescription> {
            self.inner.fetch_package_description(identity).await
        }

        async fn find_best_match(
            &self,
            id: &str,
            range: &VersionRange,
            allow_prerelease: bool,
        ) -> Result<Option<PackageRecord>> {
            self.inner.find_best_match(id, range, allow_prerelease).await
        }

        async fn find_latest(&self, id: &str) -> Result<Option<PackageRecord>> {
            self.inner.find_latest(id).await
        }
    }

    fn five_packages() -> MemorySource {
        let mut source = MemorySource::new();
        for (i, id) in ["A", "B", "C", "D", "E"].iter().enumerate() {
            source = source
                .with_package(id, "1.0.0", at(i as u32 + 1), &[])
                .unwrap();
        }
        source
    }

    async fn drain(stream: &mut PageStream) -> Vec<String> {
        let mut ids = Vec::new();
        while let Some(page) = stream.next_page().await.unwrap() {
            ids.extend(page.into_iter().map(|s| s.identity.id));
        }
        ids
    }

    #[tokio::test]
    async fn test_reads_all_pages_until_empty() {
        let mut stream = PageStream::new(Arc::new(five_packages()), &fast_config(2), at(0));
        assert_eq!(drain(&mut stream).await, vec!["A", "B", "C", "D", "E"]);
        assert_eq!(stream.pages_fetched(), 3);
        assert!(stream.is_exhausted());
        assert!(stream.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_until_bounds_the_window() {
        let mut stream = PageStream::new(Arc::new(five_packages()), &fast_config(2), at(2))
            .until(at(4) - Duration::minutes(1));
        assert_eq!(drain(&mut stream).await, vec!["B", "C"]);
    }

    #[tokio::test]
    async fn test_failed_pages_are_retried_without_loss() {
        let source = Arc::new(Flaky {
            inner: five_packages(),
            failures: 2,
            stall: false,
            calls: AtomicUsize::new(0),
        });
        let mut stream = PageStream::new(source.clone(), &fast_config(10), at(0));

        assert_eq!(drain(&mut stream).await, vec!["A", "B", "C", "D", "E"]);
        // 2 failures + full page + empty page
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_stalled_page_times_out_and_retries() {
        let source = Arc::new(Flaky {
            inner: five_packages(),
            failures: 1,
            stall: true,
            calls: AtomicUsize::new(0),
        });
        let mut stream = PageStream::new(source.clone(), &fast_config(10), at(0));

        let page = stream.next_page().await.unwrap().unwrap();
        assert_eq!(page.len(), 5);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bounded_retry_gives_up() {
        let source = Arc::new(Flaky {
            inner: five_packages(),
            failures: 10,
            stall: false,
            calls: AtomicUsize::new(0),
        });
        let mut config = fast_config(10);
        config.page_retry.max_attempts = Some(2);
        let mut stream = PageStream::new(source.clone(), &config, at(0));

        assert!(stream.next_page().await.is_err());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_prereleases_filtered_unless_allowed() {
        let source = MemorySource::new()
            .with_package("Stable", "1.0.0", at(1), &[])
            .unwrap()
            .with_package("Preview", "2.0.0-rc.1", at(2), &[])
            .unwrap()
            .with_package("Nightly", "0.1.0-alpha", at(3), &[])
            .unwrap();
        let source: Arc<dyn PackageSource> = Arc::new(source);

        let mut config = fast_config(10);
        let mut stream = PageStream::new(source.clone(), &config, at(0));
        assert_eq!(drain(&mut stream).await, vec!["Stable"]);

        config.prerelease_allowlist = vec!["preview".into()];
        let mut stream = PageStream::new(source.clone(), &config, at(0));
        assert_eq!(drain(&mut stream).await, vec!["Stable", "Preview"]);

        config.include_prerelease = true;
        let mut stream = PageStream::new(source, &config, at(0));
        assert_eq!(drain(&mut stream).await.len(), 3);
    }
}
