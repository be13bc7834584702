//! Gallery mocks, a recording transfer tool and configuration helpers

use async_trait::async_trait;
use gallery_sync::config::{DownloadConfig, PersistenceConfig, RetryConfig};
use gallery_sync::transfer::{TransferInput, TransferOutcome, TransferRequest, TransferTool};
use gallery_sync::{BulkDownloader, Config};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Base URL download links are built from in tests
pub const DOWNLOAD_BASE: &str = "https://packages.test/download";

/// Transfer tool that records the links of every link file instead of
/// downloading them
#[derive(Default)]
pub struct RecordingTool {
    links: Mutex<Vec<String>>,
    invocations: Mutex<usize>,
}

impl RecordingTool {
    /// Every link seen, in invocation order
    pub fn links(&self) -> Vec<String> {
        self.links.lock().unwrap().clone()
    }

    /// Distinct links seen
    pub fn link_set(&self) -> BTreeSet<String> {
        self.links().into_iter().collect()
    }

    /// Number of tool invocations
    pub fn invocations(&self) -> usize {
        *self.invocations.lock().unwrap()
    }
}

#[async_trait]
impl TransferTool for RecordingTool {
    async fn transfer(&self, request: &TransferRequest) -> gallery_sync::Result<TransferOutcome> {
        *self.invocations.lock().unwrap() += 1;
        match &request.input {
            TransferInput::LinkFile(file) => {
                let content = tokio::fs::read_to_string(file).await?;
                self.links
                    .lock()
                    .unwrap()
                    .extend(content.lines().map(str::to_string));
            }
            TransferInput::Url(url) => self.links.lock().unwrap().push(url.clone()),
        }
        Ok(TransferOutcome::succeeded())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Configuration pointing at `gallery`, with storage under `dir`
pub fn test_config(gallery: &MockServer, dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.source.base_url = gallery.uri();
    config.source.download_base_url = DOWNLOAD_BASE.to_string();
    config.source.page_size = 2;
    config.source.page_timeout = Duration::from_secs(5);
    config.source.page_retry = RetryConfig {
        max_attempts: Some(5),
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config.download = DownloadConfig {
        download_dir: dir.path().join("packages"),
        max_links_per_file: 2,
        ..Default::default()
    };
    config.persistence = PersistenceConfig {
        database_path: dir.path().join("gallery-sync.db"),
    };
    config
}

/// Bulk downloader over a recording tool
pub fn recording_downloader(config: &Config) -> (Arc<BulkDownloader>, Arc<RecordingTool>) {
    let tool = Arc::new(RecordingTool::default());
    let downloader = BulkDownloader::new(&config.download, tool.clone()).unwrap();
    (Arc::new(downloader), tool)
}

/// Download link of a package in tests
pub fn link(id: &str, version: &str) -> String {
    format!("{}/{}/{}", DOWNLOAD_BASE, id, version)
}

/// Feed entry JSON
pub fn feed_entry(id: &str, version: &str, published: &str) -> Value {
    json!({ "id": id, "version": version, "published": published })
}

/// Serve `entries` as the feed, split into pages of `page_size`
///
/// Every page after the last one is empty.
pub async fn mount_feed(server: &MockServer, entries: &[Value], page_size: usize) {
    let pages: Vec<&[Value]> = entries.chunks(page_size).collect();
    for (i, page) in pages.iter().enumerate() {
        Mock::given(method("GET"))
            .and(path("/packages"))
            .and(query_param("skip", (i * page_size).to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(page.to_vec()))
            .mount(server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/packages"))
        .and(query_param("skip", entries.len().to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

/// Serve a package document with the given versions
///
/// Each version is `(version, [(dependency id, optional range)])`.
pub async fn mount_package(
    server: &MockServer,
    id: &str,
    versions: &[(&str, &[(&str, Option<&str>)])],
) {
    let versions: Vec<Value> = versions
        .iter()
        .map(|(version, deps)| {
            let dependencies: Vec<Value> = deps
                .iter()
                .map(|(dep, range)| json!({ "id": dep, "range": range }))
                .collect();
            json!({
                "version": version,
                "dependency_sets": [{ "framework": null, "dependencies": dependencies }],
            })
        })
        .collect();

    Mock::given(method("GET"))
        .and(path(format!("/packages/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": id,
            "versions": versions,
        })))
        .mount(server)
        .await;
}
