//! Bulk downloader: link accumulation plus concurrent tool invocations

use super::traits::{ToolLog, TransferInput, TransferRequest, TransferTool};
use crate::config::{DownloadConfig, LogSeverity};
use crate::error::{Error, Result};
use crate::links::LinkBatchWriter;
use crate::types::DownloadReport;
use crate::utils::validate_path;
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Highest connection count the tool accepts per invocation
pub const MAX_CONNECTIONS: u32 = 16;

/// Accumulates download links and runs the external tool over them
///
/// Links are added with [`add_link`](Self::add_link) /
/// [`add_links`](Self::add_links) and land in de-duplicated link files.
/// [`download`](Self::download) flushes what is pending and runs one tool
/// invocation per link file, all of them concurrently.
pub struct BulkDownloader {
    tool: Arc<dyn TransferTool>,
    writer: LinkBatchWriter,
    download_dir: PathBuf,
    max_connections: u32,
    log: Option<ToolLog>,
    delete_temp_files: bool,
}

impl BulkDownloader {
    /// Create a downloader from `config`, correcting recoverable settings
    ///
    /// - `max_connections = 0` is corrected to 1 with a warning
    /// - a log path that is not a valid path disables tool logging
    /// - a log path with severity `None` logs at `Notice`
    /// - severity without a log path is reset to `None`
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when `max_connections` is above 16
    /// - [`Error::InvalidPath`] when the download directory is not a valid path
    /// - [`Error::Io`] when the download directory can not be created
    pub fn new(config: &DownloadConfig, tool: Arc<dyn TransferTool>) -> Result<Self> {
        let max_connections = match config.max_connections {
            0 => {
                tracing::warn!("max_connections is 0, using a single connection instead");
                1
            }
            n if n > MAX_CONNECTIONS => {
                return Err(Error::config(
                    "max_connections",
                    format!(
                        "max_connections must be between 1 and {}, got {}",
                        MAX_CONNECTIONS, n
                    ),
                ));
            }
            n => n,
        };

        validate_path(&config.download_dir)?;
        let writer = LinkBatchWriter::new(
            &config.download_dir,
            &config.link_file_prefix,
            config.max_links_per_file,
            &config.link_file_extension,
        )?;

        Ok(Self {
            tool,
            writer,
            download_dir: config.download_dir.clone(),
            max_connections,
            log: resolve_tool_log(config.log_path.as_deref(), config.log_severity),
            delete_temp_files: config.delete_temp_files,
        })
    }

    /// Connections per invocation after correction
    pub fn max_connections(&self) -> u32 {
        self.max_connections
    }

    /// Tool log settings after correction (None = tool logging disabled)
    pub fn tool_log(&self) -> Option<&ToolLog> {
        self.log.as_ref()
    }

    /// Directory downloads and link files are written to
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Queue one link, returning whether it was new
    pub async fn add_link(&self, url: &str) -> Result<bool> {
        self.writer.write(url).await
    }

    /// Queue many links, returning how many were new
    pub async fn add_links<I, S>(&self, urls: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.writer.write_all(urls).await
    }

    /// Distinct links queued since the last [`download`](Self::download)
    pub fn queued_links(&self) -> usize {
        self.writer.accepted_len()
    }

    /// Flush pending links and download every link file
    ///
    /// All invocations run concurrently and each is awaited until the tool
    /// exits. Link files of successful invocations are deleted when
    /// `delete_temp_files` is set; failed ones are always kept.
    ///
    /// The queued links are consumed: a link added after this call is
    /// queued again even if an earlier cycle already carried it.
    ///
    /// # Errors
    ///
    /// Only flushing the pending links can fail; tool failures are counted
    /// in the returned report.
    pub async fn download(&self) -> Result<DownloadReport> {
        self.writer.flush().await?;
        let units = self.writer.take_units();

        if units.is_empty() {
            tracing::warn!("No files to download, cycle is done");
            return Ok(DownloadReport::default());
        }

        tracing::info!(
            units = units.len(),
            tool = self.tool.name(),
            "Starting bulk download"
        );

        let results = join_all(units.iter().map(|unit| self.download_unit(unit))).await;
        let succeeded = results.iter().filter(|ok| **ok).count();

        let report = DownloadReport {
            units: units.len(),
            succeeded,
            failed: units.len() - succeeded,
        };

        tracing::info!(
            units = report.units,
            succeeded = report.succeeded,
            failed = report.failed,
            "Bulk download finished"
        );

        Ok(report)
    }

    /// Download a single URL with no link file in between
    ///
    /// Returns whether the tool reported success.
    pub async fn download_url(&self, url: &str) -> Result<bool> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::InvalidArgument("url to download can not be empty".into()));
        }

        tracing::info!(url = %url, "Start downloading file from url");

        let outcome = self
            .tool
            .transfer(&self.request(TransferInput::Url(url.to_string())))
            .await?;

        if !outcome.success {
            tracing::error!(
                url = %url,
                exit_code = ?outcome.exit_code,
                stderr = %outcome.stderr,
                "Download tool failed"
            );
        }
        Ok(outcome.success)
    }

    /// Queue `urls` and download everything pending
    ///
    /// An empty collection is accepted and logged as a no-op.
    pub async fn download_urls<I, S>(&self, urls: I) -> Result<DownloadReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut urls = urls.into_iter().peekable();
        if urls.peek().is_none() {
            tracing::warn!("No urls given to download, nothing to do");
            return Ok(DownloadReport::default());
        }

        let added = self.add_links(urls).await?;
        tracing::info!(urls = added, "Start downloading file(s)");
        self.download().await
    }

    fn request(&self, input: TransferInput) -> TransferRequest {
        TransferRequest {
            input,
            output_dir: self.download_dir.clone(),
            max_connections: self.max_connections,
            log: self.log.clone(),
        }
    }

    async fn download_unit(&self, unit: &Path) -> bool {
        tracing::info!(unit = %unit.display(), "Start downloading urls from link file");

        let request = self.request(TransferInput::LinkFile(unit.to_path_buf()));
        match self.tool.transfer(&request).await {
            Ok(outcome) if outcome.success => {
                tracing::info!(
                    unit = %unit.display(),
                    "Finished link file, check the tool log for details"
                );
                if self.delete_temp_files {
                    tracing::debug!(unit = %unit.display(), "Deleting link file");
                    if let Err(e) = tokio::fs::remove_file(unit).await {
                        tracing::warn!(
                            unit = %unit.display(),
                            error = %e,
                            "Failed to delete link file"
                        );
                    }
                }
                true
            }
            Ok(outcome) => {
                tracing::error!(
                    unit = %unit.display(),
                    exit_code = ?outcome.exit_code,
                    stderr = %outcome.stderr,
                    "Download tool failed, keeping link file for a manual retry"
                );
                false
            }
            Err(e) => {
                tracing::error!(
                    unit = %unit.display(),
                    error = %e,
                    "Could not run download tool, keeping link file"
                );
                false
            }
        }
    }
}

/// Apply the log path / severity rules
fn resolve_tool_log(path: Option<&Path>, severity: LogSeverity) -> Option<ToolLog> {
    let Some(path) = path else {
        if severity != LogSeverity::None {
            tracing::warn!(
                severity = severity.as_arg(),
                "Log severity set without a log path, tool logging stays off"
            );
        }
        return None;
    };

    if let Err(e) = validate_path(path) {
        tracing::error!(error = %e, "Invalid tool log path, tool logging disabled");
        return None;
    }

    let severity = if severity == LogSeverity::None {
        tracing::warn!(
            log_path = %path.display(),
            "Log path set with severity none, logging at notice"
        );
        LogSeverity::Notice
    } else {
        severity
    };

    Some(ToolLog {
        path: path.to_path_buf(),
        severity,
    })
}
