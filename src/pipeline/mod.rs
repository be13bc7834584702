//! Orchestration pipeline
//!
//! One run reads the gallery feed from a watermark, fans each candidate out to
//! four concurrent stages and downloads everything discovered once all of
//! them are done:
//!
//! ```text
//!                     ┌──▶ persist  (batched repository writes)
//! feed ──(broadcast)──┼──▶ resolve  (worker pool, recursive) ──▶ link collector ─┐
//!                     └──▶ enqueue  (candidate links) ───────────────────────────┴──▶ BulkDownloader
//! ```
//!
//! The run's state is published on a [`watch`] channel:
//! `Idle → FetchingAndResolving → AwaitingCompletion → Downloading → Done`,
//! with `Failed` reachable from every non-terminal state.

mod stages;

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::repository::DependencyRepository;
use crate::resolver::DependencyResolver;
use crate::source::{PackageSource, PageStream};
use crate::transfer::BulkDownloader;
use crate::types::{RunReport, RunState};
use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use stages::{CandidateOutputs, ResolverPool};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Where the start of the last successful run is kept
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Start of the last successful run, if any
    async fn last_fetch_time(&self) -> Result<Option<DateTime<Utc>>>;

    /// Record the start of a successful run
    async fn set_last_fetch_time(&self, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
impl WatermarkStore for Database {
    async fn last_fetch_time(&self) -> Result<Option<DateTime<Utc>>> {
        Database::last_fetch_time(self).await
    }

    async fn set_last_fetch_time(&self, at: DateTime<Utc>) -> Result<()> {
        Database::set_last_fetch_time(self, at).await
    }
}

/// Fetch, resolve and download pipeline
pub struct Pipeline {
    config: Config,
    source: Arc<dyn PackageSource>,
    repository: Arc<dyn DependencyRepository>,
    downloader: Arc<BulkDownloader>,
    state: Arc<watch::Sender<RunState>>,
}

impl Pipeline {
    /// Wire a pipeline from its collaborators
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` does not validate.
    pub fn new(
        config: Config,
        source: Arc<dyn PackageSource>,
        repository: Arc<dyn DependencyRepository>,
        downloader: Arc<BulkDownloader>,
    ) -> Result<Self> {
        config.validate()?;
        let (state, _) = watch::channel(RunState::Idle);
        Ok(Self {
            config,
            source,
            repository,
            downloader,
            state: Arc::new(state),
        })
    }

    /// Receive state changes of the current and later runs
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Current state
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Run once over packages published at or after `since`
    ///
    /// # Errors
    ///
    /// Any stage error other than a branch-local resolution failure fails the
    /// run; the state ends in [`RunState::Failed`].
    pub async fn run(&self, since: DateTime<Utc>) -> Result<RunReport> {
        self.run_window(since, None).await
    }

    /// Run once over packages published in `[since, until)`
    pub async fn run_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<RunReport> {
        if until <= since {
            return Err(Error::InvalidArgument(format!(
                "fetch window end {} is not after its start {}",
                until, since
            )));
        }
        self.run_window(since, Some(until)).await
    }

    /// Run from the stored watermark and advance it on success
    ///
    /// Without a watermark the run starts one month back. The watermark is
    /// set to the instant this run started, and only once the run is `Done`,
    /// so a failed run is fully covered again by the next one.
    pub async fn run_incremental(&self, store: &dyn WatermarkStore) -> Result<RunReport> {
        let started = Utc::now();
        let since = match store.last_fetch_time().await? {
            Some(at) => at,
            None => {
                let fallback = started
                    .checked_sub_months(Months::new(1))
                    .unwrap_or(started);
                tracing::info!(
                    since = %fallback,
                    "No fetch watermark stored, starting one month back"
                );
                fallback
            }
        };

        let report = self.run(since).await?;
        store.set_last_fetch_time(started).await?;
        Ok(report)
    }

    async fn run_window(
        &self,
        since: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    ) -> Result<RunReport> {
        self.state.send_replace(RunState::FetchingAndResolving);
        tracing::info!(
            since = %since,
            until = ?until,
            source_url = %self.config.source.base_url,
            repository = self.repository.name(),
            "Starting pipeline run"
        );

        match self.execute(since, until).await {
            Ok(report) => {
                self.state.send_replace(RunState::Done);
                tracing::info!(
                    discovered = report.discovered,
                    resolved = report.resolved,
                    queued_links = report.queued_links,
                    units = report.download.units,
                    failed_units = report.download.failed,
                    "Pipeline run finished"
                );
                Ok(report)
            }
            Err(e) => {
                self.state.send_replace(RunState::Failed);
                tracing::error!(error = %e, "Pipeline run failed");
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        since: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    ) -> Result<RunReport> {
        let page_size = self.config.source.page_size;
        let download_base_url = self.config.source.download_base_url.clone();

        let mut stream = PageStream::new(self.source.clone(), &self.config.source, since);
        if let Some(until) = until {
            stream = stream.until(until);
        }

        let (persist_tx, persist_rx) = mpsc::channel(self.config.persist_batch_size());
        let (resolve_tx, resolve_rx) = mpsc::channel(self.config.resolver_capacity());
        let (enqueue_tx, enqueue_rx) = mpsc::channel(page_size);
        let (link_tx, link_rx) = mpsc::channel(self.config.pipeline.link_channel_capacity);

        let feed = stages::spawn_feed(
            stream,
            CandidateOutputs {
                persist: persist_tx,
                resolve: resolve_tx,
                enqueue: enqueue_tx,
            },
            self.state.clone(),
        );
        let persister = stages::spawn_persister(
            self.repository.clone(),
            persist_rx,
            self.config.persist_batch_size(),
        );
        let resolver = ResolverPool {
            resolver: DependencyResolver::new(
                self.source.clone(),
                self.repository.clone(),
                &self.config.source,
            ),
            max_concurrent: self.config.pipeline.max_concurrent_resolutions,
            download_base_url: download_base_url.clone(),
        }
        .spawn(resolve_rx, link_tx);
        let enqueuer =
            stages::spawn_enqueuer(self.downloader.clone(), enqueue_rx, download_base_url);
        let collector = stages::spawn_link_collector(self.downloader.clone(), link_rx);

        // Completion barrier: every stage ends once its upstream closes
        let (feed, persister, resolver, enqueuer, collector) =
            tokio::join!(feed, persister, resolver, enqueuer, collector);

        let counts = first_failure([
            ("feed", feed),
            ("persist", persister),
            ("resolve", resolver),
            ("enqueue", enqueuer),
            ("link collector", collector),
        ])?;
        let [discovered, _, resolved, _, _] = counts;

        let queued_links = self.downloader.queued_links();
        self.state.send_replace(RunState::Downloading);
        let download = self.downloader.download().await?;

        Ok(RunReport {
            discovered,
            resolved,
            queued_links,
            download,
        })
    }
}

type StageResult = std::result::Result<Result<usize>, tokio::task::JoinError>;

/// Collect stage results, reporting the root cause when several stages failed
///
/// A stage that stopped only because a neighbour went away reports
/// [`Error::StageStopped`]; any other error is preferred over it.
fn first_failure<const N: usize>(results: [(&'static str, StageResult); N]) -> Result<[usize; N]> {
    let mut counts = [0; N];
    let mut failure: Option<Error> = None;

    for (i, (stage, joined)) in results.into_iter().enumerate() {
        let result = joined
            .map_err(|e| Error::Other(format!("{} stage panicked: {}", stage, e)))
            .and_then(|r| r);
        match result {
            Ok(count) => counts[i] = count,
            Err(e) => {
                let replace = match &failure {
                    None => true,
                    Some(Error::StageStopped(_)) => !matches!(e, Error::StageStopped(_)),
                    Some(_) => false,
                };
                if replace {
                    failure = Some(e);
                }
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(counts),
    }
}
