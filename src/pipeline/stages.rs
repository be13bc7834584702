//! Pipeline stages, each running as its own task

use crate::error::{Error, Result};
use crate::repository::DependencyRepository;
use crate::resolver::DependencyResolver;
use crate::source::PageStream;
use crate::transfer::BulkDownloader;
use crate::types::{PackageIdentity, PackageRecord, RunState};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

/// Channels the feed stage broadcasts every candidate into
pub(super) struct CandidateOutputs {
    pub persist: mpsc::Sender<PackageRecord>,
    pub resolve: mpsc::Sender<PackageRecord>,
    pub enqueue: mpsc::Sender<PackageRecord>,
}

/// Read the feed page by page and broadcast each candidate to the consumers
///
/// Returns the number of candidates discovered. Sends wait on the slowest
/// consumer, which is how resolver backpressure reaches the feed.
pub(super) fn spawn_feed(
    mut stream: PageStream,
    outputs: CandidateOutputs,
    state: Arc<watch::Sender<RunState>>,
) -> tokio::task::JoinHandle<Result<usize>> {
    tokio::spawn(async move {
        let mut discovered = 0;

        while let Some(page) = stream.next_page().await? {
            for summary in page {
                let record = summary.to_record();
                tokio::try_join!(
                    async {
                        outputs
                            .persist
                            .send(record.clone())
                            .await
                            .map_err(|_| Error::StageStopped("persist"))
                    },
                    async {
                        outputs
                            .resolve
                            .send(record.clone())
                            .await
                            .map_err(|_| Error::StageStopped("resolve"))
                    },
                    async {
                        outputs
                            .enqueue
                            .send(record.clone())
                            .await
                            .map_err(|_| Error::StageStopped("enqueue"))
                    },
                )?;
                discovered += 1;
            }
        }

        tracing::info!(
            discovered,
            pages = stream.pages_fetched(),
            "Feed stage finished, waiting for consumers"
        );
        state.send_replace(RunState::AwaitingCompletion);

        Ok(discovered)
    })
}

/// Batch candidates and store each batch in the repository as one write
///
/// Returns the number of candidates handed to the repository.
pub(super) fn spawn_persister(
    repository: Arc<dyn DependencyRepository>,
    mut rx: mpsc::Receiver<PackageRecord>,
    batch_size: usize,
) -> tokio::task::JoinHandle<Result<usize>> {
    tokio::spawn(async move {
        let mut buffer = Vec::with_capacity(batch_size);
        let mut persisted = 0;

        while let Some(record) = rx.recv().await {
            buffer.push(record);
            if buffer.len() >= batch_size {
                repository.add_records(&buffer).await?;
                persisted += buffer.len();
                buffer.clear();
            }
        }

        // Channel closed, flush the partial batch
        if !buffer.is_empty() {
            repository.add_records(&buffer).await?;
            persisted += buffer.len();
        }

        tracing::debug!(persisted, repository = repository.name(), "Persist stage finished");
        Ok(persisted)
    })
}

/// Queue the download link of every top-level candidate
pub(super) fn spawn_enqueuer(
    downloader: Arc<BulkDownloader>,
    mut rx: mpsc::Receiver<PackageRecord>,
    download_base_url: String,
) -> tokio::task::JoinHandle<Result<usize>> {
    tokio::spawn(async move {
        let mut queued = 0;
        while let Some(record) = rx.recv().await {
            if downloader
                .add_link(&record.download_link(&download_base_url))
                .await?
            {
                queued += 1;
            }
        }
        tracing::debug!(queued, "Enqueue stage finished");
        Ok(queued)
    })
}

/// Queue dependency links discovered by the resolver stage
pub(super) fn spawn_link_collector(
    downloader: Arc<BulkDownloader>,
    mut rx: mpsc::Receiver<String>,
) -> tokio::task::JoinHandle<Result<usize>> {
    tokio::spawn(async move {
        let mut queued = 0;
        while let Some(link) = rx.recv().await {
            if downloader.add_link(&link).await? {
                queued += 1;
            }
        }
        tracing::debug!(queued, "Link collector finished");
        Ok(queued)
    })
}

/// Settings for the resolver worker pool
pub(super) struct ResolverPool {
    pub resolver: DependencyResolver,
    pub max_concurrent: usize,
    pub download_base_url: String,
}

impl ResolverPool {
    /// Resolve candidates and, transitively, everything they pull in
    ///
    /// At most `max_concurrent` resolutions run at a time. Dependencies found
    /// by a resolution are queued ahead of new candidates, and new candidates
    /// are only taken while nothing is queued, so a deep graph pauses the feed
    /// instead of growing the backlog. The walk ends when every resolution has
    /// come back empty and the feed is closed.
    ///
    /// A node whose resolution fails with a branch-local error is dropped;
    /// any other error stops the stage.
    ///
    /// Returns the number of dependencies resolved.
    pub(super) fn spawn(
        self,
        mut input: mpsc::Receiver<PackageRecord>,
        links: mpsc::Sender<String>,
    ) -> tokio::task::JoinHandle<Result<usize>> {
        tokio::spawn(async move {
            let mut tasks: JoinSet<(PackageIdentity, Result<Vec<PackageRecord>>)> =
                JoinSet::new();
            let mut pending: VecDeque<PackageIdentity> = VecDeque::new();
            let mut input_open = true;
            let mut resolved = 0;

            loop {
                while tasks.len() < self.max_concurrent
                    && let Some(identity) = pending.pop_front()
                {
                    let resolver = self.resolver.clone();
                    tasks.spawn(async move {
                        let result = resolver.resolve_dependencies(&identity, true).await;
                        (identity, result)
                    });
                }

                if !input_open && pending.is_empty() && tasks.is_empty() {
                    break;
                }

                tokio::select! {
                    biased;

                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        let (identity, result) = joined.map_err(|e| {
                            Error::Other(format!("resolver task failed: {}", e))
                        })?;
                        match result {
                            Ok(records) => {
                                for record in records {
                                    links
                                        .send(record.download_link(&self.download_base_url))
                                        .await
                                        .map_err(|_| Error::StageStopped("link collector"))?;
                                    pending.push_back(record.identity);
                                    resolved += 1;
                                }
                            }
                            Err(e) if e.is_branch_local() => {
                                tracing::warn!(
                                    package = %identity,
                                    error = %e,
                                    "Failed to resolve dependencies, skipping package"
                                );
                            }
                            Err(e) => {
                                tracing::error!(
                                    package = %identity,
                                    error = %e,
                                    "Dependency resolution failed"
                                );
                                return Err(e);
                            }
                        }
                    }

                    msg = input.recv(),
                        if input_open && pending.is_empty() && tasks.len() < self.max_concurrent =>
                    {
                        match msg {
                            Some(record) => pending.push_back(record.identity),
                            None => input_open = false,
                        }
                    }
                }
            }

            tracing::debug!(resolved, "Resolve stage finished");
            Ok(resolved)
        })
    }
}
