//! HTTP gallery client

use super::{PackageSource, PageRequest, best_match, latest};
use crate::config::SourceConfig;
use crate::error::{Error, Result, SourceError};
use crate::types::{
    DependencySet, DependencySpec, PackageDescription, PackageIdentity, PackageRecord,
    PackageSummary, VersionRange,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use semver::Version;
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Feed entry as returned by `GET {base}/packages`
#[derive(Debug, Deserialize)]
struct FeedEntry {
    id: String,
    version: String,
    published: DateTime<Utc>,
}

/// Package document as returned by `GET {base}/packages/{id}`
#[derive(Debug, Deserialize)]
struct PackageDocument {
    id: String,
    #[serde(default)]
    versions: Vec<VersionEntry>,
}

#[derive(Debug, Deserialize)]
struct VersionEntry {
    version: String,
    #[serde(default)]
    dependency_sets: Vec<DependencySetEntry>,
}

#[derive(Debug, Deserialize)]
struct DependencySetEntry {
    #[serde(default)]
    framework: Option<String>,
    #[serde(default)]
    dependencies: Vec<DependencyEntry>,
}

#[derive(Debug, Deserialize)]
struct DependencyEntry {
    id: String,
    #[serde(default)]
    range: Option<String>,
}

impl DependencyEntry {
    /// Parse the declared dependency, skipping it when the range is unparsable
    fn to_spec(&self, owner: &PackageIdentity) -> Option<DependencySpec> {
        match DependencySpec::parse(&self.id, self.range.as_deref()) {
            Ok(spec) => Some(spec),
            Err(e) => {
                tracing::warn!(
                    package = %owner,
                    dependency = %self.id,
                    error = %e,
                    "Skipping dependency with unparsable range"
                );
                None
            }
        }
    }
}

impl PackageDocument {
    /// Versions that parse, paired with their entries
    fn parsed_versions(&self) -> Vec<(Version, &VersionEntry)> {
        self.versions
            .iter()
            .filter_map(|entry| match Version::parse(entry.version.trim()) {
                Ok(v) => Some((v, entry)),
                Err(e) => {
                    tracing::warn!(
                        package = %self.id,
                        version = %entry.version,
                        error = %e,
                        "Skipping unparsable version"
                    );
                    None
                }
            })
            .collect()
    }
}

/// Package source backed by a gallery's JSON endpoints
///
/// - `GET {base}/packages?since=&until=&skip=&take=&prerelease=` returns
///   `[{"id", "version", "published"}]`
/// - `GET {base}/packages/{id}` returns
///   `{"id", "versions": [{"version", "dependency_sets": [{"framework", "dependencies": [{"id", "range"}]}]}]}`
///
/// A 404 on a package document means the package does not exist.
pub struct GalleryClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl GalleryClient {
    /// Create a client for `config.base_url`
    pub fn new(config: &SourceConfig) -> Result<Self> {
        url::Url::parse(&config.base_url).map_err(|e| {
            Error::config("base_url", format!("invalid URL {:?}: {}", config.base_url, e))
        })?;

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// GET `url` and decode the JSON body; `Ok(None)` on 404
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let response = self.http_client.get(url).query(query).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SourceError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            }
            .into());
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map(Some).map_err(|e| {
            SourceError::Malformed {
                url: url.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    async fn package_document(&self, id: &str) -> Result<Option<PackageDocument>> {
        let url = format!("{}/packages/{}", self.base_url, urlencoding::encode(id));
        self.get_json(&url, &[]).await
    }

    fn record(document: &PackageDocument, requested_id: &str, version: &Version) -> PackageRecord {
        let id = if document.id.trim().is_empty() {
            requested_id
        } else {
            document.id.as_str()
        };
        PackageRecord::new(PackageIdentity::new(id, version.clone()))
    }
}

#[async_trait]
impl PackageSource for GalleryClient {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<PackageSummary>> {
        let url = format!("{}/packages", self.base_url);
        let mut query = vec![
            (
                "since",
                request.since.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("skip", request.skip.to_string()),
            ("take", request.take.to_string()),
            ("prerelease", request.include_prerelease.to_string()),
        ];
        if let Some(until) = request.until {
            query.push(("until", until.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }

        let entries: Vec<FeedEntry> =
            self.get_json(&url, &query)
                .await?
                .ok_or_else(|| SourceError::Http {
                    status: 404,
                    url: url.clone(),
                })?;

        tracing::debug!(
            skip = request.skip,
            entries = entries.len(),
            "Fetched gallery page"
        );

        Ok(entries
            .into_iter()
            .filter_map(
                |entry| match PackageIdentity::parse(&entry.id, &entry.version) {
                    Ok(identity) => Some(PackageSummary {
                        identity,
                        published: entry.published,
                    }),
                    Err(e) => {
                        tracing::warn!(package = %entry.id, error = %e, "Skipping feed entry");
                        None
                    }
                },
            )
            .collect())
    }

    async fn fetch_package_description(
        &self,
        identity: &PackageIdentity,
    ) -> Result<PackageDescription> {
        let document = self
            .package_document(&identity.id)
            .await?
            .ok_or_else(|| SourceError::PackageNotFound(identity.id.clone()))?;

        let entry = document
            .parsed_versions()
            .into_iter()
            .find(|(v, _)| *v == identity.version)
            .map(|(_, entry)| entry)
            .ok_or_else(|| SourceError::PackageNotFound(identity.to_string()))?;

        let dependency_sets = entry
            .dependency_sets
            .iter()
            .map(|set| DependencySet {
                framework: set.framework.clone().filter(|f| !f.trim().is_empty()),
                dependencies: set
                    .dependencies
                    .iter()
                    .filter_map(|dep| dep.to_spec(identity))
                    .collect(),
            })
            .collect();

        Ok(PackageDescription {
            identity: identity.clone(),
            dependency_sets,
        })
    }

    async fn find_best_match(
        &self,
        id: &str,
        range: &VersionRange,
        allow_prerelease: bool,
    ) -> Result<Option<PackageRecord>> {
        let Some(document) = self.package_document(id).await? else {
            return Ok(None);
        };
        let versions = document.parsed_versions();
        Ok(
            best_match(versions.iter().map(|(v, _)| v), range, allow_prerelease)
                .map(|v| Self::record(&document, id, v)),
        )
    }

    async fn find_latest(&self, id: &str) -> Result<Option<PackageRecord>> {
        let Some(document) = self.package_document(id).await? else {
            return Ok(None);
        };
        let versions = document.parsed_versions();
        Ok(latest(versions.iter().map(|(v, _)| v)).map(|v| Self::record(&document, id, v)))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GalleryClient {
        GalleryClient::new(&SourceConfig {
            base_url: format!("{}/api/", server.uri()),
            ..Default::default()
        })
        .unwrap()
    }

    fn serilog_document() -> serde_json::Value {
        json!({
            "id": "Serilog",
            "versions": [
                {"version": "2.0.0", "dependency_sets": []},
                {"version": "2.12.0", "dependency_sets": [
                    {"framework": "net45", "dependencies": [
                        {"id": "Microsoft.CSharp", "range": ">=4.0.1"}
                    ]},
                    {"framework": null, "dependencies": [
                        {"id": "System.Collections"},
                        {"id": "Broken", "range": ">=banana"}
                    ]}
                ]},
                {"version": "3.0.0-dev.1"},
                {"version": "not-a-version"}
            ]
        })
    }

    #[tokio::test]
    async fn test_fetch_page_sends_paging_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/packages"))
            .and(query_param("since", "2024-01-01T00:00:00Z"))
            .and(query_param("skip", "20"))
            .and(query_param("take", "20"))
            .and(query_param("prerelease", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "Serilog", "version": "2.12.0", "published": "2024-01-02T10:00:00Z"},
                {"id": "Bad", "version": "x.y", "published": "2024-01-02T10:00:00Z"},
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let page = client(&server)
            .fetch_page(&PageRequest {
                since: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                until: None,
                skip: 20,
                take: 20,
                include_prerelease: false,
            })
            .await
            .unwrap();

        assert_eq!(page.len(), 1);
        assert_eq!(page[0].identity.id, "Serilog");
        assert_eq!(
            page[0].published,
            Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_fetch_page_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/packages"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = client(&server)
            .fetch_page(&PageRequest {
                since: Utc::now(),
                until: Some(Utc::now()),
                skip: 0,
                take: 20,
                include_prerelease: true,
            })
            .await;

        match result {
            Err(Error::Source(SourceError::Http { status, .. })) => assert_eq!(status, 503),
            other => panic!("expected HTTP 503, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_package_description() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/packages/Serilog"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serilog_document()))
            .mount(&server)
            .await;

        let identity = PackageIdentity::parse("Serilog", "2.12.0").unwrap();
        let description = client(&server)
            .fetch_package_description(&identity)
            .await
            .unwrap();

        assert_eq!(description.identity, identity);
        assert_eq!(description.dependency_sets.len(), 2);
        assert_eq!(
            description.dependency_sets[0].framework.as_deref(),
            Some("net45")
        );
        assert_eq!(
            description.dependency_sets[0].dependencies[0],
            DependencySpec::parse("Microsoft.CSharp", Some(">=4.0.1")).unwrap()
        );
        // The unparsable range is dropped, the unconstrained one kept
        assert_eq!(
            description.dependency_sets[1].dependencies,
            vec![DependencySpec::new("System.Collections", None)]
        );
    }

    #[tokio::test]
    async fn test_unknown_version_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/packages/Serilog"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serilog_document()))
            .mount(&server)
            .await;

        let identity = PackageIdentity::parse("Serilog", "9.9.9").unwrap();
        let result = client(&server).fetch_package_description(&identity).await;
        assert!(matches!(
            result,
            Err(Error::Source(SourceError::PackageNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_lookups_on_missing_package() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/packages/Ghost"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(client.find_latest("Ghost").await.unwrap().is_none());
        let range: VersionRange = ">=1.0.0".parse().unwrap();
        assert!(
            client
                .find_best_match("Ghost", &range, true)
                .await
                .unwrap()
                .is_none()
        );
        let identity = PackageIdentity::parse("Ghost", "1.0.0").unwrap();
        assert!(matches!(
            client.fetch_package_description(&identity).await,
            Err(Error::Source(SourceError::PackageNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_find_best_match_and_latest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/packages/serilog"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serilog_document()))
            .mount(&server)
            .await;

        let client = client(&server);
        let range: VersionRange = ">=2.0.0".parse().unwrap();

        let stable = client
            .find_best_match("serilog", &range, false)
            .await
            .unwrap()
            .unwrap();
        // Canonical casing comes from the gallery
        assert_eq!(stable.id(), "Serilog");
        assert_eq!(stable.version(), &Version::new(2, 12, 0));

        let pre = client
            .find_best_match("serilog", &range, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pre.version().to_string(), "3.0.0-dev.1");

        let latest = client.find_latest("serilog").await.unwrap().unwrap();
        assert_eq!(latest.version(), &Version::new(2, 12, 0));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/packages/Serilog"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let result = client(&server).find_latest("Serilog").await;
        assert!(matches!(
            result,
            Err(Error::Source(SourceError::Malformed { .. }))
        ));
    }

    #[test]
    fn test_new_rejects_invalid_base_url() {
        let result = GalleryClient::new(&SourceConfig {
            base_url: "gallery without scheme".into(),
            ..Default::default()
        });
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
