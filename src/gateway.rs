//! Client side of the remote vector-store API.
//!
//! The orchestrator talks to the store exclusively through the
//! [`IngestGateway`], [`DeletionGateway`], [`StatusReporter`], and
//! [`CollectionProbe`] traits, so tests inject in-memory fakes and the
//! production binary wires in [`HttpGateway`].
//!
//! Semantics assumed of the remote side (and verified there): an ingest
//! whose `doc_hash` matches the store's current record is an idempotent
//! no-op returning the existing version; a differing hash atomically
//! replaces the document's full chunk set under an incremented version.
//! Deletion is idempotent — deleting an absent id still succeeds. The
//! remote serializes version bumps per document id; the orchestrator in
//! turn never has two ingests for the same id in flight.
//!
//! # Retry Strategy
//!
//! Transient failures (network errors, timeouts, 429, 5xx) are retried
//! with exponential backoff: `backoff_ms`, ×2, ×4, ... (shift capped at
//! 2^6). Any other 4xx fails immediately.
//!
//! The configured `timeout_secs` budget belongs to ingest, whose payload
//! can be megabytes of chunks; deletes, status reports, and the stats
//! probe carry much tighter per-request deadlines.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ApiConfig;
use crate::error::SyncError;
use crate::models::{Chunk, RunReport};

/// Deadline for a single delete call; the payload is one document id.
const DELETE_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline for status reports and the stats probe.
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

/// `POST /ingest` request body.
#[derive(Debug, Clone, Serialize)]
pub struct IngestRequest {
    pub document_id: String,
    pub doc_hash: String,
    pub last_modified: DateTime<Utc>,
    pub chunks: Vec<Chunk>,
}

/// `POST /ingest` response body.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    /// Number of chunks the store accepted (0 for an unchanged no-op).
    #[serde(default, rename = "ingested")]
    pub ingested_count: u64,
    #[serde(default)]
    pub document_id: String,
    /// The document's version after this call. Absent when the store
    /// skipped an unchanged document, in which case the prior version
    /// stands.
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub doc_hash: Option<String>,
}

/// `POST /delete_document` response body.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteResponse {
    pub status: String,
    #[serde(default)]
    pub deleted_document_id: String,
}

/// Pushes one document's full chunk set to the store.
#[async_trait]
pub trait IngestGateway: Send + Sync {
    async fn ingest(&self, request: IngestRequest) -> Result<IngestResponse, SyncError>;
}

/// Removes every chunk of one document from the store.
#[async_trait]
pub trait DeletionGateway: Send + Sync {
    async fn delete(&self, document_id: &str) -> Result<DeleteResponse, SyncError>;
}

/// Fire-and-forget run summary sink. A failure here never invalidates an
/// otherwise-successful run.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, report: &RunReport) -> Result<(), SyncError>;
}

/// Best-effort probe of the store's document count, used to detect an
/// emptied collection that needs a full re-ingest. `None` means the store
/// could not say (unreachable, malformed response).
#[async_trait]
pub trait CollectionProbe: Send + Sync {
    async fn document_count(&self) -> Option<u64>;
}

/// Production gateway speaking JSON over HTTP to the store service.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    admin_key: Option<String>,
    max_retries: u32,
    backoff_ms: u64,
}

impl HttpGateway {
    pub fn new(config: &ApiConfig, admin_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            admin_key,
            max_retries: config.max_retries,
            backoff_ms: config.backoff_ms,
        })
    }

    async fn post_json<B, T>(
        &self,
        path: &str,
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<T, SyncError>
    where
        B: Serialize + Sync,
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(self.backoff_ms, attempt)).await;
            }

            let mut request = self.client.post(&url).json(body);
            if let Some(deadline) = timeout {
                request = request.timeout(deadline);
            }
            if let Some(key) = &self.admin_key {
                request = request.header("X-Admin-Key", key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json::<T>()
                            .await
                            .map_err(|e| SyncError::TransientNetwork(e.to_string()));
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = SyncError::from_status(status.as_u16(), body_text);
                    if err.is_transient() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(SyncError::from_transport(&e));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| SyncError::TransientNetwork("request failed after retries".into())))
    }
}

/// Exponential backoff before retry `attempt` (1-based).
fn backoff_delay(backoff_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(backoff_ms << (attempt - 1).min(6))
}

#[async_trait]
impl IngestGateway for HttpGateway {
    async fn ingest(&self, request: IngestRequest) -> Result<IngestResponse, SyncError> {
        // Uses the client's full configured timeout; chunk payloads are
        // the one large request this gateway makes
        self.post_json("/ingest", &request, None).await
    }
}

#[async_trait]
impl DeletionGateway for HttpGateway {
    async fn delete(&self, document_id: &str) -> Result<DeleteResponse, SyncError> {
        let body = serde_json::json!({ "document_id": document_id });
        self.post_json("/delete_document", &body, Some(DELETE_TIMEOUT))
            .await
    }
}

#[async_trait]
impl StatusReporter for HttpGateway {
    async fn report(&self, report: &RunReport) -> Result<(), SyncError> {
        let _: serde_json::Value = self
            .post_json("/admin/indexer_status", report, Some(STATUS_TIMEOUT))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CollectionProbe for HttpGateway {
    async fn document_count(&self) -> Option<u64> {
        let url = format!("{}/admin/status", self.base_url);
        let mut request = self.client.get(&url).timeout(STATUS_TIMEOUT);
        if let Some(key) = &self.admin_key {
            request = request.header("X-Admin-Key", key);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "could not fetch collection stats");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(status = %response.status(), "collection stats request rejected");
            return None;
        }

        let json: serde_json::Value = response.json().await.ok()?;
        json.get("document_count").and_then(|v| v.as_u64())
    }
}
