//! Database layer for gallery-sync
//!
//! SQLite persistence for the dependency repository and the fetch watermark.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`packages`]: Stored package records
//! - [`state`]: Runtime state (last fetch watermark)

use crate::types::{PackageIdentity, PackageRecord};
use chrono::{TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod packages;
mod state;

/// Package record as stored in the `packages` table
#[derive(Debug, Clone, FromRow)]
pub struct PackageRow {
    /// Display key, `{id}.{version}`; not unique on its own
    pub key: String,
    /// Package id as discovered
    pub package_id: String,
    /// Version string
    pub version: String,
    /// Unix timestamp when the record was inserted
    pub inserted_at: i64,
}

impl TryFrom<PackageRow> for PackageRecord {
    type Error = crate::Error;

    fn try_from(row: PackageRow) -> crate::Result<Self> {
        Ok(PackageRecord {
            identity: PackageIdentity::parse(&row.package_id, &row.version)?,
            inserted_at: Utc
                .timestamp_opt(row.inserted_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

/// Database handle for gallery-sync
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
