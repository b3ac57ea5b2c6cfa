//! Opaque osquery interface (spec.md §1 "treated as an opaque `Query(sql) →
//! rows` interface"). Neither the runner nor the scheduled-query table
//! system is implemented here; only the capability boundary `QueryHandler`
//! and the identity refresher need.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query failed: {0}")]
    Failed(String),
    #[error("unknown scheduled query: {0}")]
    UnknownScheduledQuery(String),
}

/// One result row, an arbitrary JSON object as osquery returns.
pub type Row = serde_json::Map<String, Value>;

#[async_trait]
pub trait Querier: Send + Sync {
    /// Run an ad hoc SQL query against the osquery virtual tables.
    async fn query(&self, sql: &str) -> Result<Vec<Row>, QueryError>;

    /// Fetch the most recent result of a named scheduled query.
    async fn scheduled_query(&self, name: &str) -> Result<Vec<Row>, QueryError>;

    /// Identity fields consumed by the identity refresher (spec.md §4.7).
    async fn identity_fields(&self) -> Result<(String, String, String), QueryError>;
}

/// Controls applied by `AccelerateHandler` to distributed-query forwarding
/// (spec.md §4.7); an opaque capability, implemented by the real osquery
/// extension outside this crate's scope.
#[async_trait]
pub trait DistributedAccelerator: Send + Sync {
    async fn accelerate(&self, interval_secs: u64, duration_secs: u64) -> Result<(), QueryError>;
}

/// A `Querier`/`DistributedAccelerator` that always fails; used only as the
/// default when no real osquery extension is wired in (e.g. in tests that
/// never exercise `/query` or `/acceleratecontrol`).
pub struct UnconfiguredQuerier;

#[async_trait]
impl Querier for UnconfiguredQuerier {
    async fn query(&self, _sql: &str) -> Result<Vec<Row>, QueryError> {
        Err(QueryError::Failed("no osquery runner configured".to_string()))
    }

    async fn scheduled_query(&self, name: &str) -> Result<Vec<Row>, QueryError> {
        Err(QueryError::UnknownScheduledQuery(name.to_string()))
    }

    async fn identity_fields(&self) -> Result<(String, String, String), QueryError> {
        Err(QueryError::Failed("no osquery runner configured".to_string()))
    }
}

#[async_trait]
impl DistributedAccelerator for UnconfiguredQuerier {
    async fn accelerate(&self, _interval_secs: u64, _duration_secs: u64) -> Result<(), QueryError> {
        Err(QueryError::Failed("no osquery runner configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_querier_always_errors() {
        let q = UnconfiguredQuerier;
        assert!(q.query("select 1").await.is_err());
        assert!(q.scheduled_query("anything").await.is_err());
        assert!(q.identity_fields().await.is_err());
        assert!(q.accelerate(1, 1).await.is_err());
    }
}
