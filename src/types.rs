//! Core types for gallery-sync

use chrono::{DateTime, Utc};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Unique (id, semantic version) pair identifying a downloadable package
///
/// Equality is structural and this is the de-duplication key everywhere.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageIdentity {
    /// Package id as published by the gallery
    pub id: String,
    /// Package version
    pub version: Version,
}

impl PackageIdentity {
    /// Create an identity from an already parsed version
    pub fn new(id: impl Into<String>, version: Version) -> Self {
        Self {
            id: id.into(),
            version,
        }
    }

    /// Parse an identity from a raw `(id, version)` pair
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidVersion`] when `version` is not semantic-version
    /// syntax and [`Error::InvalidArgument`] when `id` is blank.
    pub fn parse(id: &str, version: &str) -> Result<Self> {
        let id = id.trim();
        if id.is_empty() {
            return Err(Error::InvalidArgument("package id can not be empty".into()));
        }
        let version = Version::parse(version.trim()).map_err(|e| Error::InvalidVersion {
            value: version.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(id, version))
    }

    /// Whether this is a pre-release version
    pub fn is_prerelease(&self) -> bool {
        !self.version.pre.is_empty()
    }

    /// Key in the format `{id}.{version}`
    ///
    /// Distinct identities share a key when one id extends the other with a
    /// dot segment that starts with a digit: `Pkg.1.0.0-x` at `1.0.0` and
    /// `Pkg` at `1.0.0-x.1.0.0` both give `Pkg.1.0.0-x.1.0.0`. Storage and
    /// de-duplication compare id and version instead.
    pub fn formatted_key(&self) -> String {
        format!("{}.{}", self.id, self.version)
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.version)
    }
}

/// A package the pipeline discovered, as stored in the dependency repository
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Which package this is
    pub identity: PackageIdentity,
    /// When the record was created
    pub inserted_at: DateTime<Utc>,
}

impl PackageRecord {
    /// Create a record stamped with the current time
    pub fn new(identity: PackageIdentity) -> Self {
        Self {
            identity,
            inserted_at: Utc::now(),
        }
    }

    /// Parse a record from a raw `(id, version)` pair
    pub fn parse(id: &str, version: &str) -> Result<Self> {
        PackageIdentity::parse(id, version).map(Self::new)
    }

    /// Package id
    pub fn id(&self) -> &str {
        &self.identity.id
    }

    /// Package version
    pub fn version(&self) -> &Version {
        &self.identity.version
    }

    /// Key in the format `{id}.{version}`, see [`PackageIdentity::formatted_key`]
    pub fn formatted_key(&self) -> String {
        self.identity.formatted_key()
    }

    /// Download URL for this package under `base_url`
    ///
    /// Pure function of the identity and the base URL; a trailing slash on the
    /// base is ignored.
    pub fn download_link(&self, base_url: &str) -> String {
        format!(
            "{}/{}/{}",
            base_url.trim_end_matches('/'),
            urlencoding::encode(&self.identity.id),
            self.identity.version
        )
    }
}

/// A version constraint on a dependency
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionRange(VersionReq);

impl VersionRange {
    /// Wrap a parsed requirement
    pub fn new(req: VersionReq) -> Self {
        Self(req)
    }

    /// The underlying requirement
    pub fn requirement(&self) -> &VersionReq {
        &self.0
    }

    /// Whether `version` satisfies this range
    ///
    /// Without `allow_prerelease` this is plain semver matching (pre-releases
    /// only match comparators that name them). With it, a pre-release is judged
    /// by its release triple, so `>=1.0.0` accepts `2.0.0-beta.1`.
    pub fn matches(&self, version: &Version, allow_prerelease: bool) -> bool {
        if self.0.matches(version) {
            return true;
        }
        if allow_prerelease && !version.pre.is_empty() {
            let release = Version::new(version.major, version.minor, version.patch);
            return self.0.matches(&release);
        }
        false
    }
}

impl FromStr for VersionRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        VersionReq::parse(s.trim())
            .map(Self)
            .map_err(|e| Error::InvalidVersion {
                value: s.to_string(),
                reason: e.to_string(),
            })
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A declared dependency edge before resolution to a concrete version
///
/// `version_range: None` means "any version": resolve to the absolute latest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencySpec {
    /// Id of the package depended on
    pub package_id: String,
    /// Accepted versions (None = unconstrained)
    pub version_range: Option<VersionRange>,
}

impl DependencySpec {
    /// Create a spec
    pub fn new(package_id: impl Into<String>, version_range: Option<VersionRange>) -> Self {
        Self {
            package_id: package_id.into(),
            version_range,
        }
    }

    /// Parse a spec from an id and an optional range string
    ///
    /// An empty or blank range string is treated as unconstrained.
    pub fn parse(package_id: &str, range: Option<&str>) -> Result<Self> {
        let version_range = match range.map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(raw.parse()?),
        };
        Ok(Self::new(package_id, version_range))
    }

    /// Whether a stored version satisfies this spec
    ///
    /// Unconstrained specs are satisfied by any version of the package.
    pub fn is_satisfied_by(&self, version: &Version) -> bool {
        match &self.version_range {
            None => true,
            Some(range) => range.matches(version, true),
        }
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version_range {
            Some(range) => write!(f, "{} ({})", self.package_id, range),
            None => write!(f, "{} (any)", self.package_id),
        }
    }
}

/// Dependencies declared for one target framework
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencySet {
    /// Target framework moniker (None = framework agnostic)
    pub framework: Option<String>,
    /// Declared dependencies
    pub dependencies: Vec<DependencySpec>,
}

/// Full description of one package version as published by the gallery
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageDescription {
    /// Which package this describes
    pub identity: PackageIdentity,
    /// Dependency sets per target framework
    pub dependency_sets: Vec<DependencySet>,
}

/// One entry of a gallery feed page
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageSummary {
    /// Which package was published
    pub identity: PackageIdentity,
    /// When it was published
    pub published: DateTime<Utc>,
}

impl PackageSummary {
    /// Convert to a repository record
    pub fn to_record(&self) -> PackageRecord {
        PackageRecord::new(self.identity.clone())
    }
}

/// Lifecycle of a single pipeline run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Constructed, not yet running
    Idle,
    /// Feed pages are being fetched and dependencies resolved
    FetchingAndResolving,
    /// Feed exhausted, waiting for the remaining stages to drain
    AwaitingCompletion,
    /// The external bulk downloader is running
    Downloading,
    /// Run finished successfully
    Done,
    /// Run stopped on an unrecoverable error
    Failed,
}

impl RunState {
    /// Whether the run can make no further progress
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

/// Outcome of one bulk download
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadReport {
    /// Link files handed to the tool
    pub units: usize,
    /// Units the tool finished with exit code 0
    pub succeeded: usize,
    /// Units that failed (kept on disk for a manual retry)
    pub failed: usize,
}

/// Counts reported after a successful pipeline run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Candidates taken from the gallery feed
    pub discovered: usize,
    /// Dependencies resolved (at any depth)
    pub resolved: usize,
    /// Distinct download links queued
    pub queued_links: usize,
    /// Result of the bulk download
    pub download: DownloadReport,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_identity() {
        let identity = PackageIdentity::parse("Newtonsoft.Json", "13.0.3").unwrap();
        assert_eq!(identity.id, "Newtonsoft.Json");
        assert_eq!(identity.version, Version::new(13, 0, 3));
        assert!(!identity.is_prerelease());
        assert_eq!(identity.formatted_key(), "Newtonsoft.Json.13.0.3");
    }

    #[test]
    fn test_parse_identity_rejects_bad_version() {
        match PackageIdentity::parse("Foo", "one.two") {
            Err(Error::InvalidVersion { value, .. }) => assert_eq!(value, "one.two"),
            other => panic!("expected InvalidVersion, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_identity_rejects_empty_id() {
        assert!(matches!(
            PackageIdentity::parse("  ", "1.0.0"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_download_link() {
        let record = PackageRecord::parse("Serilog", "2.12.0-dev.1").unwrap();
        assert_eq!(
            record.download_link("https://gallery.example/package/"),
            "https://gallery.example/package/Serilog/2.12.0-dev.1"
        );
        assert_eq!(
            record.download_link("https://gallery.example/package"),
            "https://gallery.example/package/Serilog/2.12.0-dev.1"
        );
    }

    #[test]
    fn test_download_link_encodes_id() {
        let record = PackageRecord::parse("odd id", "1.0.0").unwrap();
        assert_eq!(record.download_link("http://g"), "http://g/odd%20id/1.0.0");
    }

    #[test]
    fn test_range_without_prerelease() {
        let range: VersionRange = ">=1.0.0".parse().unwrap();
        assert!(range.matches(&Version::new(1, 2, 0), false));
        assert!(!range.matches(&Version::parse("2.0.0-beta.1").unwrap(), false));
        assert!(!range.matches(&Version::new(0, 9, 0), false));
    }

    #[test]
    fn test_range_with_prerelease_fallback() {
        let range: VersionRange = ">=1.0.0".parse().unwrap();
        assert!(range.matches(&Version::parse("2.0.0-beta.1").unwrap(), true));
        assert!(!range.matches(&Version::parse("0.5.0-alpha").unwrap(), true));
    }

    #[test]
    fn test_spec_parse_blank_range_is_unconstrained() {
        let spec = DependencySpec::parse("Foo", Some("  ")).unwrap();
        assert!(spec.version_range.is_none());
        assert!(spec.is_satisfied_by(&Version::new(0, 0, 1)));
        assert_eq!(spec.to_string(), "Foo (any)");
    }

    #[test]
    fn test_spec_parse_invalid_range() {
        assert!(DependencySpec::parse("Foo", Some(">=banana")).is_err());
    }

    #[test]
    fn test_run_state_terminal() {
        assert!(RunState::Done.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert!(!RunState::Downloading.is_terminal());
    }

    #[test]
    fn test_formatted_key_collision_needs_digit_led_segment() {
        let short = PackageIdentity::parse("Pkg", "1.0.0-x.1.0.0").unwrap();
        let long = PackageIdentity::parse("Pkg.1.0.0-x", "1.0.0").unwrap();
        assert_ne!(short, long);
        assert_eq!(short.formatted_key(), long.formatted_key());
        assert!(has_digit_led_segment(&long.id));
    }

    fn has_digit_led_segment(id: &str) -> bool {
        id.split('.')
            .skip(1)
            .any(|segment| segment.starts_with(|c: char| c.is_ascii_digit()))
    }

    fn id_strategy() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9_-]{0,6}(\\.[A-Za-z0-9][A-Za-z0-9_-]{0,5}){0,3}"
    }

    fn version_strategy() -> impl Strategy<Value = Version> {
        let pre = "[a-z][a-z0-9-]{0,4}(\\.(0|[1-9][0-9]{0,2}|[a-z][a-z0-9]{0,3})){0,2}";
        (0u64..50, 0u64..50, 0u64..50, proptest::option::of(pre)).prop_map(
            |(major, minor, patch, pre)| {
                let mut version = Version::new(major, minor, patch);
                if let Some(pre) = pre {
                    version.pre = semver::Prerelease::new(&pre).unwrap();
                }
                version
            },
        )
    }

    proptest! {
        #[test]
        fn prop_formatted_key_collides_only_on_digit_led_segments(
            a_id in id_strategy(),
            a_version in version_strategy(),
            b_id in id_strategy(),
            b_version in version_strategy(),
        ) {
            let a = PackageIdentity::new(a_id, a_version);
            let b = PackageIdentity::new(b_id, b_version);
            if a != b && a.formatted_key() == b.formatted_key() {
                prop_assert!(has_digit_led_segment(&a.id) || has_digit_led_segment(&b.id));
            }
        }
    }
}
