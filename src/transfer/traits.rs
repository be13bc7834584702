//! Traits and types for the external bulk-transfer tool

use crate::config::LogSeverity;
use async_trait::async_trait;
use std::path::PathBuf;

/// What a single tool invocation downloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferInput {
    /// A link file with one URL per line
    LinkFile(PathBuf),
    /// One URL, no intermediate file
    Url(String),
}

/// Log sink handed to the tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolLog {
    /// File the tool appends its log to
    pub path: PathBuf,
    /// Log level (never [`LogSeverity::None`] once validated)
    pub severity: LogSeverity,
}

/// One invocation of the external tool
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Links to fetch
    pub input: TransferInput,
    /// Directory downloads are written to
    pub output_dir: PathBuf,
    /// Parallel connections the tool may open (1-16)
    pub max_connections: u32,
    /// Tool log, if enabled
    pub log: Option<ToolLog>,
}

/// Result of one invocation
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Whether the tool exited with code 0
    pub success: bool,
    /// Exit code (None if the process was killed by a signal)
    pub exit_code: Option<i32>,
    /// Tail of the tool's stderr, for the error log
    pub stderr: String,
}

impl TransferOutcome {
    /// An outcome reporting success
    pub fn succeeded() -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            stderr: String::new(),
        }
    }

    /// An outcome reporting failure with the given exit code
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: Some(exit_code),
            stderr: stderr.into(),
        }
    }
}

/// Trait for the external bulk-transfer executable
///
/// Implementations run one transfer to completion and report whether it
/// succeeded. A non-zero exit is reported through [`TransferOutcome`], not as
/// an error; errors mean the tool could not be run at all.
///
/// # Examples
///
/// ```no_run
/// use gallery_sync::transfer::{CliTransferTool, TransferInput, TransferRequest, TransferTool};
/// use std::path::PathBuf;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let tool = CliTransferTool::from_path().expect("aria2c not found");
/// let outcome = tool
///     .transfer(&TransferRequest {
///         input: TransferInput::LinkFile(PathBuf::from("packages/links0.txt")),
///         output_dir: PathBuf::from("packages"),
///         max_connections: 10,
///         log: None,
///     })
///     .await?;
/// println!("success: {}", outcome.success);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait TransferTool: Send + Sync {
    /// Run one transfer and wait for the tool to exit
    ///
    /// # Errors
    ///
    /// Returns an error if the tool can not be started, or if this
    /// implementation does not support transfers.
    async fn transfer(&self, request: &TransferRequest) -> crate::Result<TransferOutcome>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
