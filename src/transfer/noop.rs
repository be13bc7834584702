//! No-op transfer tool for hosts without a bulk downloader

use super::traits::{TransferOutcome, TransferRequest, TransferTool};
use async_trait::async_trait;

/// Transfer tool used when no external binary is available or configured
///
/// Every transfer returns `Error::NotSupported`, so the bulk downloader counts
/// each unit as failed and keeps its link file on disk for a later run.
pub struct NoOpTransferTool;

#[async_trait]
impl TransferTool for NoOpTransferTool {
    async fn transfer(&self, _request: &TransferRequest) -> crate::Result<TransferOutcome> {
        Err(crate::Error::NotSupported(
            "Bulk download requires an external aria2c binary. \
             Configure tool_path in config or ensure aria2c is in PATH."
                .into(),
        ))
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
