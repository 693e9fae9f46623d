//! Result store lookups.
//!
//! The capture pool deposits one row per produced result into
//! `result_records`. The orchestrator side only ever does point lookups by
//! the composite correlation key; rows are never written or deleted here.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::model::{ResultRecord, WorkKind};

/// Queryable, eventually-populated outcome store.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Point lookup by `(kind, identity, observed_on)`. Zero or one record;
    /// when the same key was written more than once today, the latest
    /// `produced_at` wins.
    async fn fetch(
        &self,
        kind: WorkKind,
        identity: &str,
        observed_on: NaiveDate,
    ) -> Result<Option<ResultRecord>>;
}

#[async_trait]
impl ResultStore for super::Db {
    async fn fetch(
        &self,
        kind: WorkKind,
        identity: &str,
        observed_on: NaiveDate,
    ) -> Result<Option<ResultRecord>> {
        let row: Option<ResultRow> = sqlx::query_as(
            "SELECT kind, identity, observed_on, produced_at, payload
             FROM result_records
             WHERE kind = $1 AND identity = $2 AND observed_on = $3
             ORDER BY produced_at DESC
             LIMIT 1",
        )
        .bind(kind.collection())
        .bind(identity)
        .bind(observed_on)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|r| ResultRecord {
            kind,
            identity: r.identity,
            observed_on: r.observed_on,
            produced_at: r.produced_at,
            payload: r.payload,
        }))
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct ResultRow {
    #[allow(dead_code)]
    kind: String,
    identity: String,
    observed_on: NaiveDate,
    produced_at: chrono::DateTime<chrono::Utc>,
    payload: serde_json::Value,
}
