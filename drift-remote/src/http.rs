//! HTTP remote store client
//!
//! REST transport against the managed store. Status mapping is part of
//! the contract: 401 is an auth failure, transport errors and 5xx are
//! retryable, other 4xx are not.

use std::time::Duration;

use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use drift_types::{Result, Row, SyncError};

use crate::payload::UploadPayload;
use crate::{QueryMetadata, QueryResult, RemoteStore};

use async_trait::async_trait;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_LOG_BODY_CHARS: usize = 512;

/// Error body the server sends alongside non-2xx statuses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    limit: Option<u64>,
    used: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RowsBody {
    #[serde(default)]
    rows: Vec<Row>,
    #[serde(default)]
    metadata: Option<MetadataBody>,
}

#[derive(Debug, Default, Deserialize)]
struct MetadataBody {
    count: Option<u64>,
    has_more: Option<bool>,
    cursor: Option<String>,
}

/// Client for the remote store's REST API.
pub struct HttpRemoteClient {
    client: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl HttpRemoteClient {
    /// Create a client against `base_url` with the default timeout.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::unknown(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        })
    }

    async fn bearer(&self) -> Result<HeaderValue> {
        let token = self.token.read().await;
        let token = token
            .as_deref()
            .ok_or_else(|| SyncError::auth("client is not authenticated"))?;
        HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| SyncError::auth("credential contains invalid header characters"))
    }

    fn transport_err(e: reqwest::Error) -> SyncError {
        if e.is_timeout() {
            SyncError::network(format!("request timed out: {e}"))
        } else {
            SyncError::network(format!("transport failure: {e}"))
        }
    }

    /// Map a non-success response into the error taxonomy.
    async fn error_for(response: Response) -> SyncError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let preview: String = body.chars().take(MAX_LOG_BODY_CHARS).collect();
        warn!("remote store error ({status}): {preview}");

        let parsed: Option<ApiErrorBody> = serde_json::from_str(&body).ok();
        if status == StatusCode::UNAUTHORIZED {
            let message = parsed
                .map(|b| b.message)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "credential rejected".to_string());
            return SyncError::auth(message);
        }
        if let Some(body) = &parsed {
            if body.code.eq_ignore_ascii_case("quota_exceeded") {
                return SyncError::Quota {
                    limit: body.limit.unwrap_or(0),
                    used: body.used.unwrap_or(0),
                };
            }
        }
        let message = parsed
            .map(|b| {
                if b.message.is_empty() {
                    format!("HTTP {status}")
                } else {
                    format!("{}: {}", b.code, b.message)
                }
            })
            .unwrap_or_else(|| format!("HTTP {status}"));
        SyncError::network_status(status.as_u16(), message)
    }

    async fn parse_rows(response: Response) -> Result<RowsBody> {
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::unknown(format!("failed to read response body: {e}")))?;
        serde_json::from_str(&body)
            .map_err(|e| SyncError::unknown(format!("malformed response body: {e}")))
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteClient {
    async fn authenticate(&self, token: &str) -> Result<()> {
        let url = format!("{}/v1/auth/session", self.base_url);
        let header = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| SyncError::auth("credential contains invalid header characters"))?;
        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, header)
            .send()
            .await
            .map_err(Self::transport_err)?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        // Replace the bound token only once the server has accepted it.
        *self.token.write().await = Some(token.to_string());
        debug!("remote store session established");
        Ok(())
    }

    async fn execute_sql(&self, sql: &str) -> Result<QueryResult> {
        let url = format!("{}/v1/sql", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, self.bearer().await?)
            .json(&serde_json::json!({ "sql": sql }))
            .send()
            .await
            .map_err(Self::transport_err)?;

        let body = Self::parse_rows(response).await?;
        let metadata = body.metadata.unwrap_or_default();
        Ok(QueryResult {
            rows: body.rows,
            metadata: QueryMetadata {
                count: metadata.count,
                has_more: metadata.has_more,
                cursor: metadata.cursor,
            },
        })
    }

    async fn upload(&self, table: &str, payload: UploadPayload) -> Result<()> {
        let url = format!("{}/v1/tables/{table}/rows", self.base_url);
        let request = self
            .client
            .post(&url)
            .header(AUTHORIZATION, self.bearer().await?);

        let request = match payload {
            UploadPayload::Rows(rows) => request.json(&serde_json::json!({ "rows": rows })),
            UploadPayload::Gzip(bytes) => request
                .header(CONTENT_TYPE, "application/json")
                .header(CONTENT_ENCODING, "gzip")
                .body(bytes),
        };

        let response = request.send().await.map_err(Self::transport_err)?;
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }
        debug!("uploaded batch to table {table}");
        Ok(())
    }

    async fn download(&self, table: &str, since_ts: Option<i64>) -> Result<Vec<Row>> {
        let url = format!("{}/v1/tables/{table}/rows", self.base_url);
        let mut request = self
            .client
            .get(&url)
            .header(AUTHORIZATION, self.bearer().await?);
        if let Some(since) = since_ts {
            request = request.query(&[("since", since.to_string())]);
        }

        let response = request.send().await.map_err(Self::transport_err)?;
        let body = Self::parse_rows(response).await?;
        debug!("downloaded {} rows from table {table}", body.rows.len());
        Ok(body.rows)
    }
}
