//! Configuration types for gallery-sync

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Package gallery settings (where candidates come from, how pages are fetched)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the gallery metadata API (default: "https://www.nuget.org/api/v2")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Base URL download links are built from (default: "https://www.nuget.org/api/v2/package")
    #[serde(default = "default_download_base_url")]
    pub download_base_url: String,

    /// Number of packages requested per page (default: 20)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Time allowed for a single page request before it is retried (default: 45 seconds)
    #[serde(default = "default_page_timeout", with = "duration_serde")]
    pub page_timeout: Duration,

    /// Timeout for every other gallery request (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Target frameworks whose dependency sets are considered (empty = all)
    #[serde(default)]
    pub target_frameworks: Vec<String>,

    /// Whether pre-release candidates are taken from the feed (default: false)
    #[serde(default)]
    pub include_prerelease: bool,

    /// Package ids whose pre-release versions are mirrored even when
    /// `include_prerelease` is off
    #[serde(default)]
    pub prerelease_allowlist: Vec<String>,

    /// User agent sent to the gallery
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Retry policy for page requests (default: retry forever with capped backoff)
    #[serde(default = "RetryConfig::unbounded")]
    pub page_retry: RetryConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            download_base_url: default_download_base_url(),
            page_size: default_page_size(),
            page_timeout: default_page_timeout(),
            request_timeout: default_request_timeout(),
            target_frameworks: Vec::new(),
            include_prerelease: false,
            prerelease_allowlist: Vec::new(),
            user_agent: default_user_agent(),
            page_retry: RetryConfig::unbounded(),
        }
    }
}

impl SourceConfig {
    /// Whether a pre-release version of `id` may enter the pipeline from the feed
    pub fn allows_prerelease(&self, id: &str) -> bool {
        self.include_prerelease
            || self
                .prerelease_allowlist
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(id))
    }

    /// Whether a dependency set declared for `framework` applies to this mirror
    ///
    /// A set without a framework applies everywhere.
    pub fn accepts_framework(&self, framework: Option<&str>) -> bool {
        match framework {
            None => true,
            Some(_) if self.target_frameworks.is_empty() => true,
            Some(fw) => self
                .target_frameworks
                .iter()
                .any(|target| target.eq_ignore_ascii_case(fw)),
        }
    }
}

/// Log level handed to the external bulk downloader
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSeverity {
    /// No tool log is written (only valid when no log path is configured)
    #[default]
    None,
    /// Debug
    Debug,
    /// Info
    Info,
    /// Notice
    Notice,
    /// Warn
    Warn,
    /// Error
    Error,
}

impl LogSeverity {
    /// Value passed to the tool's `--log-level` flag
    pub fn as_arg(&self) -> &'static str {
        match self {
            LogSeverity::None => "none",
            LogSeverity::Debug => "debug",
            LogSeverity::Info => "info",
            LogSeverity::Notice => "notice",
            LogSeverity::Warn => "warn",
            LogSeverity::Error => "error",
        }
    }
}

/// Bulk download settings (output directory, link files, external tool)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory packages and link files are written to (default: "./packages")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Delete link files after the tool finished them successfully (default: true)
    #[serde(default = "default_true")]
    pub delete_temp_files: bool,

    /// Parallel connections per tool invocation, 1-16 (default: 10, 0 is corrected to 1)
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// File the tool logs to (None = tool logging disabled)
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Severity of the tool log
    #[serde(default)]
    pub log_severity: LogSeverity,

    /// Maximum URLs per link file (default: 5000)
    #[serde(default = "default_max_links_per_file")]
    pub max_links_per_file: usize,

    /// Link file name prefix (default: "links")
    #[serde(default = "default_link_file_prefix")]
    pub link_file_prefix: String,

    /// Link file extension (default: "txt")
    #[serde(default = "default_link_file_extension")]
    pub link_file_extension: String,

    /// Path to the bulk download executable (auto-detected if None)
    #[serde(default)]
    pub tool_path: Option<PathBuf>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            delete_temp_files: true,
            max_connections: default_max_connections(),
            log_path: None,
            log_severity: LogSeverity::None,
            max_links_per_file: default_max_links_per_file(),
            link_file_prefix: default_link_file_prefix(),
            link_file_extension: default_link_file_extension(),
            tool_path: None,
        }
    }
}

/// Pipeline tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// How many pages worth of candidates may wait for dependency resolution
    /// before the feed is paused (default: 5)
    #[serde(default = "default_max_pages_in_flight")]
    pub max_pages_in_flight: usize,

    /// Packages whose dependencies are resolved at the same time (default: 16)
    #[serde(default = "default_max_concurrent_resolutions")]
    pub max_concurrent_resolutions: usize,

    /// Candidates persisted per repository write (None = page size)
    #[serde(default)]
    pub persist_batch_size: Option<usize>,

    /// Capacity of the discovered-link channel (default: 1000)
    #[serde(default = "default_link_channel_capacity")]
    pub link_channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_pages_in_flight: default_max_pages_in_flight(),
            max_concurrent_resolutions: default_max_concurrent_resolutions(),
            persist_batch_size: None,
            link_channel_capacity: default_link_channel_capacity(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite file holding the dependency repository and the fetch watermark
    /// (default: "./gallery-sync.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Retry configuration with exponential backoff
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (None = retry forever)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Retry forever, backing off up to `max_delay` between attempts
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            ..Self::default()
        }
    }

    /// Check the backoff settings
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when `backoff_multiplier` is not a finite number of
    /// at least 1.0, or `initial_delay` exceeds `max_delay`.
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "backoff_multiplier",
                format!(
                    "backoff multiplier must be a finite number >= 1.0, got {}",
                    self.backoff_multiplier
                ),
            ));
        }
        if self.initial_delay > self.max_delay {
            return Err(Error::config(
                "initial_delay",
                format!(
                    "initial delay {:?} is longer than the maximum delay {:?}",
                    self.initial_delay, self.max_delay
                ),
            ));
        }
        Ok(())
    }
}

/// Main configuration for gallery-sync
///
/// Passed by value into the component constructors; nothing reads
/// configuration from process-wide state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Package gallery settings
    #[serde(default)]
    pub source: SourceConfig,

    /// Bulk download settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Pipeline tuning
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Reject structurally invalid settings
    ///
    /// Values with a documented correction (such as `max_connections = 0`) are
    /// left for the owning component to correct and log.
    pub fn validate(&self) -> Result<()> {
        if self.source.page_size == 0 {
            return Err(Error::config("page_size", "page size must be greater than zero"));
        }
        for (key, value) in [
            ("base_url", &self.source.base_url),
            ("download_base_url", &self.source.download_base_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| Error::config(key, format!("invalid URL {:?}: {}", value, e)))?;
        }
        self.source.page_retry.validate()?;
        if self.download.max_links_per_file == 0 {
            return Err(Error::config(
                "max_links_per_file",
                "a link file must hold at least one URL",
            ));
        }
        if self.pipeline.max_pages_in_flight == 0 {
            return Err(Error::config(
                "max_pages_in_flight",
                "at least one page must be allowed in flight",
            ));
        }
        if self.pipeline.max_concurrent_resolutions == 0 {
            return Err(Error::config(
                "max_concurrent_resolutions",
                "at least one resolution must be allowed to run",
            ));
        }
        if self.pipeline.persist_batch_size == Some(0) {
            return Err(Error::config(
                "persist_batch_size",
                "persist batch size must be greater than zero",
            ));
        }
        if self.pipeline.link_channel_capacity == 0 {
            return Err(Error::config(
                "link_channel_capacity",
                "link channel capacity must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Capacity of the resolver stage input (page size × pages in flight)
    pub fn resolver_capacity(&self) -> usize {
        self.source.page_size * self.pipeline.max_pages_in_flight
    }

    /// Candidates per repository batch write
    pub fn persist_batch_size(&self) -> usize {
        self.pipeline
            .persist_batch_size
            .unwrap_or(self.source.page_size)
    }
}

fn default_base_url() -> String {
    "https://www.nuget.org/api/v2".into()
}

fn default_download_base_url() -> String {
    "https://www.nuget.org/api/v2/package".into()
}

fn default_page_size() -> usize {
    20
}

fn default_page_timeout() -> Duration {
    Duration::from_secs(45)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("gallery-sync/{}", env!("CARGO_PKG_VERSION"))
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./packages")
}

fn default_max_connections() -> u32 {
    10
}

fn default_max_links_per_file() -> usize {
    5000
}

fn default_link_file_prefix() -> String {
    "links".into()
}

fn default_link_file_extension() -> String {
    "txt".into()
}

fn default_max_pages_in_flight() -> usize {
    5
}

fn default_max_concurrent_resolutions() -> usize {
    16
}

fn default_link_channel_capacity() -> usize {
    1000
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./gallery-sync.db")
}

fn default_max_attempts() -> Option<u32> {
    Some(5)
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
