//! CLI transfer tool using an external aria2-compatible binary

use super::traits::{TransferInput, TransferOutcome, TransferRequest, TransferTool};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use tokio::process::Command;

/// Binary looked up in PATH when none is configured
const DEFAULT_BINARY: &str = "aria2c";

/// Bytes of stderr kept for the error log
const STDERR_TAIL: usize = 2048;

/// Transfer tool that spawns an external `aria2c`-compatible process
///
/// # Examples
///
/// ```no_run
/// use gallery_sync::transfer::CliTransferTool;
/// use std::path::PathBuf;
///
/// // Explicit binary
/// let tool = CliTransferTool::new(PathBuf::from("/usr/bin/aria2c"));
///
/// // Or auto-discover from PATH
/// let tool = CliTransferTool::from_path().expect("aria2c not found in PATH");
/// ```
pub struct CliTransferTool {
    binary_path: PathBuf,
}

impl CliTransferTool {
    /// Create a tool with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find `aria2c` in PATH
    pub fn from_path() -> Option<Self> {
        which::which(DEFAULT_BINARY).ok().map(Self::new)
    }

    /// Path of the binary this tool runs
    pub fn binary_path(&self) -> &std::path::Path {
        &self.binary_path
    }

    /// Command-line arguments for `request`
    ///
    /// Link files are passed with `-x N -i FILE -d DIR` plus the optional log
    /// flags; a single URL is passed as `URL -d DIR`.
    pub fn build_args(request: &TransferRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        match &request.input {
            TransferInput::LinkFile(path) => {
                args.push("-x".into());
                args.push(request.max_connections.to_string().into());
                args.push("-i".into());
                args.push(path.clone().into_os_string());
                args.push("-d".into());
                args.push(request.output_dir.clone().into_os_string());
                if let Some(log) = &request.log {
                    let mut log_arg = OsString::from("--log=");
                    log_arg.push(&log.path);
                    args.push(log_arg);
                    args.push(format!("--log-level={}", log.severity.as_arg()).into());
                }
            }
            TransferInput::Url(url) => {
                args.push(url.into());
                args.push("-d".into());
                args.push(request.output_dir.clone().into_os_string());
            }
        }
        args
    }
}

#[async_trait]
impl TransferTool for CliTransferTool {
    async fn transfer(&self, request: &TransferRequest) -> crate::Result<TransferOutcome> {
        let output = Command::new(&self.binary_path)
            .args(Self::build_args(request))
            .output()
            .await
            .map_err(|e| {
                crate::Error::ExternalTool(format!(
                    "Failed to execute {}: {}",
                    self.binary_path.display(),
                    e
                ))
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let start = stderr
            .char_indices()
            .rev()
            .nth(STDERR_TAIL)
            .map(|(i, _)| i)
            .unwrap_or(0);

        Ok(TransferOutcome {
            success: output.status.success(),
            exit_code: output.status.code(),
            stderr: stderr[start..].to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "cli-aria2"
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogSeverity;
    use crate::transfer::ToolLog;

    fn request(input: TransferInput, log: Option<ToolLog>) -> TransferRequest {
        TransferRequest {
            input,
            output_dir: PathBuf::from("/srv/packages"),
            max_connections: 4,
            log,
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.into_string().unwrap())
            .collect()
    }

    #[test]
    fn test_link_file_args_without_log() {
        let args = CliTransferTool::build_args(&request(
            TransferInput::LinkFile(PathBuf::from("/srv/packages/links0.txt")),
            None,
        ));
        assert_eq!(
            strings(args),
            vec![
                "-x",
                "4",
                "-i",
                "/srv/packages/links0.txt",
                "-d",
                "/srv/packages"
            ]
        );
    }

    #[test]
    fn test_link_file_args_with_log() {
        let args = CliTransferTool::build_args(&request(
            TransferInput::LinkFile(PathBuf::from("links0.txt")),
            Some(ToolLog {
                path: PathBuf::from("/var/log/aria.log"),
                severity: LogSeverity::Notice,
            }),
        ));
        let args = strings(args);
        assert_eq!(args[args.len() - 2], "--log=/var/log/aria.log");
        assert_eq!(args[args.len() - 1], "--log-level=notice");
    }

    #[test]
    fn test_single_url_args() {
        let args = CliTransferTool::build_args(&request(
            TransferInput::Url("https://g/package/Foo/1.0.0".into()),
            None,
        ));
        assert_eq!(
            strings(args),
            vec!["https://g/package/Foo/1.0.0", "-d", "/srv/packages"]
        );
    }

    #[test]
    fn test_from_path_consistency_with_which_crate() {
        let which_result = which::which(DEFAULT_BINARY);
        let from_path_result = CliTransferTool::from_path();

        assert_eq!(
            which_result.is_ok(),
            from_path_result.is_some(),
            "from_path() should return Some if and only if which::which() succeeds"
        );
        if let (Ok(expected), Some(tool)) = (which_result, from_path_result) {
            assert_eq!(tool.binary_path(), expected.as_path());
            assert_eq!(tool.name(), "cli-aria2");
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_external_tool_error() {
        let tool = CliTransferTool::new(PathBuf::from("/nonexistent/gallery-sync-aria2c"));
        let result = tool
            .transfer(&request(TransferInput::Url("http://x".into()), None))
            .await;
        assert!(matches!(result, Err(crate::Error::ExternalTool(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_code_is_reported() {
        // `false` ignores its arguments and exits 1
        let Ok(bin) = which::which("false") else {
            return;
        };
        let tool = CliTransferTool::new(bin);
        let outcome = tool
            .transfer(&request(TransferInput::Url("http://x".into()), None))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(1));
    }
}
