//! Bulk transfer through an external downloader
//!
//! The [`TransferTool`] trait is the seam to the external executable:
//!
//! - [`CliTransferTool`]: spawns an `aria2c`-compatible binary
//! - [`NoOpTransferTool`]: stub used when no binary is available
//!
//! [`BulkDownloader`] sits on top of it, accumulating links into link files
//! and running one tool invocation per file.

mod cli;
mod downloader;
mod noop;
mod traits;


pub use cli::CliTransferTool;
pub use downloader::{BulkDownloader, MAX_CONNECTIONS};
pub use noop::NoOpTransferTool;
pub use traits::{ToolLog, TransferInput, TransferOutcome, TransferRequest, TransferTool};
