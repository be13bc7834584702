//! # gallery-sync
//!
//! Incremental mirroring of a package gallery: reads recently published
//! packages, walks their transitive dependencies against a persistent
//! "already seen" repository, and hands every new package to an external bulk
//! downloader.
//!
//! ## Design Philosophy
//!
//! gallery-sync is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Injected, not global** - Configuration and collaborators are passed into
//!   constructors; nothing reads process-wide state
//! - **At-least-once** - The fetch watermark only advances after a run is done
//!
//! ## Quick Start
//!
//! ```no_run
//! use gallery_sync::{Config, open};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let (pipeline, db) = open(config).await?;
//!
//!     // Watch the run progress
//!     let mut states = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while states.changed().await.is_ok() {
//!             println!("State: {:?}", *states.borrow());
//!         }
//!     });
//!
//!     let report = pipeline.run_incremental(&db).await?;
//!     println!("{} packages discovered", report.discovered);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Batched link files
pub mod links;
/// Fetch, resolve and download orchestration
pub mod pipeline;
/// De-duplication repository
pub mod repository;
/// Dependency resolution
pub mod resolver;
/// Retry logic with exponential backoff
pub mod retry;
/// Package gallery access
pub mod source;
/// External bulk downloader
pub mod transfer;
/// Core types
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, DownloadConfig, LogSeverity, PipelineConfig, RetryConfig, SourceConfig};
pub use db::Database;
pub use error::{DatabaseError, Error, Result, SourceError};
pub use links::LinkBatchWriter;
pub use pipeline::{Pipeline, WatermarkStore};
pub use repository::{DependencyRepository, EmptyRepository, MemoryRepository};
pub use resolver::DependencyResolver;
pub use source::{GalleryClient, MemorySource, PackageSource};
pub use transfer::{BulkDownloader, CliTransferTool, NoOpTransferTool, TransferTool};
pub use types::{
    DependencySpec, DownloadReport, PackageIdentity, PackageRecord, RunReport, RunState,
    VersionRange,
};

use std::sync::Arc;

/// Wire a pipeline from `config` with the default collaborators
///
/// - SQLite repository and watermark at `persistence.database_path`
/// - HTTP gallery client for `source.base_url`
/// - the bulk download tool at `download.tool_path`, or found on `PATH`
///
/// When no tool can be found the pipeline still runs, but every download is
/// reported as failed and the link files are kept.
///
/// The returned [`Database`] is the watermark store for
/// [`Pipeline::run_incremental`].
///
/// # Errors
///
/// Fails on an invalid configuration or if the database can not be opened.
pub async fn open(config: Config) -> Result<(Pipeline, Database)> {
    config.validate()?;

    let db = Database::new(&config.persistence.database_path).await?;
    let source = GalleryClient::new(&config.source)?;

    let tool: Arc<dyn TransferTool> = match &config.download.tool_path {
        Some(path) => Arc::new(CliTransferTool::new(path.clone())),
        None => match CliTransferTool::from_path() {
            Some(tool) => Arc::new(tool),
            None => {
                tracing::warn!("Bulk download tool not found in PATH, downloads are disabled");
                Arc::new(NoOpTransferTool)
            }
        },
    };
    let downloader = BulkDownloader::new(&config.download, tool)?;

    let pipeline = Pipeline::new(
        config,
        Arc::new(source),
        Arc::new(db.clone()),
        Arc::new(downloader),
    )?;
    Ok((pipeline, db))
}
