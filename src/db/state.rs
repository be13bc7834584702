//! Runtime state: the last successful fetch watermark.

use crate::error::DatabaseError;
use crate::{Error, Result};
use chrono::{DateTime, Utc};

use super::Database;

const LAST_FETCH_TIME: &str = "last_fetch_time";

impl Database {
    /// Start of the last successful run, if any run has succeeded
    pub async fn last_fetch_time(&self) -> Result<Option<DateTime<Utc>>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM runtime_state WHERE key = ?")
                .bind(LAST_FETCH_TIME)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to read last fetch time: {}",
                        e
                    )))
                })?;

        value
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| {
                        Error::Database(DatabaseError::QueryFailed(format!(
                            "Stored last fetch time {:?} is not a timestamp: {}",
                            raw, e
                        )))
                    })
            })
            .transpose()
    }

    /// Record the start of a successful run
    pub async fn set_last_fetch_time(&self, at: DateTime<Utc>) -> Result<()> {
        let now = Utc::now().timestamp();
        let value = at.to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO runtime_state (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(LAST_FETCH_TIME)
        .bind(&value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to set last fetch time: {}",
                e
            )))
        })?;

        tracing::info!(last_fetch_time = %value, "Advanced fetch watermark");
        Ok(())
    }
}
