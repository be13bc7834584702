//! Error types for gallery-sync
//!
//! This module provides the error handling used across the crate:
//! - Configuration and contract errors raised at construction time
//! - Repository (SQLite) errors, which are fatal to a run
//! - Package-source errors, which are local to one resolution branch
//! - External transfer tool errors

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for gallery-sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for gallery-sync
///
/// Each variant carries enough context to diagnose the failure from a log line.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_connections")
        key: Option<String>,
    },

    /// A directory or file path contains characters the platform does not allow
    #[error("invalid path {path}: {reason}")]
    InvalidPath {
        /// The rejected path
        path: PathBuf,
        /// Why the path was rejected
        reason: String,
    },

    /// A caller broke an argument contract
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A version string is not valid semantic-version syntax
    #[error("invalid version {value:?}: {reason}")]
    InvalidVersion {
        /// The raw version string
        value: String,
        /// Parser message
        reason: String,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Package gallery returned something unusable
    #[error("package source error: {0}")]
    Source(#[from] SourceError),

    /// A page request did not complete in time
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External tool execution failed (bulk downloader binary)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (missing binary, no-op implementation)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Write attempted after the link writer was closed
    #[error("link writer is closed")]
    WriterClosed,

    /// A pipeline stage went away while another stage was still feeding it
    #[error("{0} stage stopped before the run completed")]
    StageStopped(&'static str),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Package source errors
#[derive(Debug, Error)]
pub enum SourceError {
    /// The gallery answered with a non-success HTTP status
    #[error("HTTP {status} from {url}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// The response body could not be interpreted
    #[error("malformed response from {url}: {reason}")]
    Malformed {
        /// Requested URL
        url: String,
        /// What was wrong with it
        reason: String,
    },

    /// The gallery does not know this package (or this version of it)
    #[error("package {0} not found")]
    PackageNotFound(String),
}

impl Error {
    /// Build a configuration error for a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Whether this failure only affects a single resolution branch
    ///
    /// Package-source lookups for one package are branch-local: the package is
    /// dropped and its siblings continue. Repository, filesystem and
    /// configuration failures are fatal to the whole run.
    pub fn is_branch_local(&self) -> bool {
        matches!(
            self,
            Error::Source(_) | Error::Network(_) | Error::Timeout(_) | Error::InvalidVersion { .. }
        )
    }
}
