//! Remote store client
//!
//! Authenticates against the managed store, executes queries, uploads
//! bulk rows with at-least-once upsert semantics, and downloads rows
//! since a watermark. The HTTP transport is one implementation of the
//! contract; tests run against the scripted mock.

pub mod http;
pub mod mock;
pub mod payload;

use async_trait::async_trait;

use drift_types::{Result, Row};

pub use http::HttpRemoteClient;
pub use mock::MockRemoteStore;
pub use payload::UploadPayload;

/// Metadata attached to a query result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryMetadata {
    pub count: Option<u64>,
    pub has_more: Option<bool>,
    pub cursor: Option<String>,
}

/// Rows plus metadata returned by `execute_sql`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub metadata: QueryMetadata,
}

/// The remote store contract consumed by the sync engine.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Validate and bind the token; the prior token is replaced atomically
    /// on success.
    async fn authenticate(&self, token: &str) -> Result<()>;

    /// Execute a SQL statement remotely.
    async fn execute_sql(&self, sql: &str) -> Result<QueryResult>;

    /// Upsert rows into `table`, keyed on the table's primary key.
    /// At-least-once semantics: re-sending a payload is safe.
    async fn upload(&self, table: &str, payload: UploadPayload) -> Result<()>;

    /// Rows whose last-update timestamp exceeds `since_ts`, or all rows
    /// when absent.
    async fn download(&self, table: &str, since_ts: Option<i64>) -> Result<Vec<Row>>;
}
