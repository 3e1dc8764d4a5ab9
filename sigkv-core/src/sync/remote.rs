//! One sync pass against a pub over HTTP.
//!
//! A pass always pulls first and then pushes:
//!
//! 1. `GET {domain}documents-collection/{workspace}` and ingest every
//!    document in the returned array. A 404 means the pub has never seen
//!    this workspace.
//! 2. `POST` the same path with every local document, including every
//!    author's row, so the pub can pick winners on its own. A 404 means the
//!    pub does not accept new workspaces; a 403 means it is read-only.
//!
//! Any transport failure aborts the whole pass and is reported as a result
//! with neither a pull nor a push outcome.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::storage::{Query, Storage, StorageError};

use super::error::TransportError;

/// Default timeout for a single HTTP request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Minimal HTTP client used by the sync pass.
pub trait Transport: Send + Sync {
    fn get(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;

    fn post_json(
        &self,
        url: &str,
        body: String,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

/// [`Transport`] over reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    async fn read(response: reqwest::Response) -> Result<TransportResponse, TransportError> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(TransportResponse { status, body })
    }
}

impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Self::read(response).await
    }

    async fn post_json(&self, url: &str, body: String) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Self::read(response).await
    }
}

/// Counts from ingesting a batch of documents.
///
/// This is also the body a pub answers a push with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub ingested: u64,
    pub ignored: u64,
    pub total: u64,
}

/// What happened to a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PushOutcome {
    /// The pub ingested the documents and reported these counts.
    Accepted(IngestStats),
    /// 404: the pub does not host this workspace and will not start to.
    NotAcceptingWorkspace,
    /// 403: the pub does not accept writes.
    ReadOnly,
}

/// Outcome of one pass. `None` on both sides means the pass failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub pull: Option<IngestStats>,
    pub push: Option<PushOutcome>,
}

impl SyncResult {
    pub fn failed() -> Self {
        Self::default()
    }

    pub fn is_total_failure(&self) -> bool {
        self.pull.is_none() && self.push.is_none()
    }
}

/// URL of the documents collection for `workspace` on a pub.
///
/// `domain` is expected to end with `/`.
pub fn documents_url(domain: &str, workspace: &str) -> String {
    format!(
        "{}documents-collection/{}",
        domain,
        urlencoding::encode(workspace)
    )
}

enum PassError {
    Transport(TransportError),
    Storage(StorageError),
}

impl From<TransportError> for PassError {
    fn from(e: TransportError) -> Self {
        PassError::Transport(e)
    }
}

impl From<StorageError> for PassError {
    fn from(e: StorageError) -> Self {
        PassError::Storage(e)
    }
}

/// Pull from and then push to the pub at `domain`.
///
/// Transport problems are folded into the returned [`SyncResult`]; only
/// local storage failures are returned as errors.
pub async fn sync_with_pub<T: Transport>(
    storage: &Storage,
    transport: &T,
    domain: &str,
) -> Result<SyncResult, StorageError> {
    let url = documents_url(domain, storage.workspace());

    let pass = async {
        let pull = pull(storage, transport, &url).await?;
        let push = push(storage, transport, &url).await?;
        Ok::<_, PassError>(SyncResult {
            pull: Some(pull),
            push: Some(push),
        })
    };

    match pass.await {
        Ok(result) => {
            tracing::info!(pub_url = %url, ?result, "sync pass finished");
            Ok(result)
        }
        Err(PassError::Transport(e)) => {
            tracing::error!(pub_url = %url, "sync pass failed: {}", e);
            Ok(SyncResult::failed())
        }
        Err(PassError::Storage(e)) => Err(e),
    }
}

async fn pull<T: Transport>(
    storage: &Storage,
    transport: &T,
    url: &str,
) -> Result<IngestStats, PassError> {
    let response = transport.get(url).await?;
    match response.status {
        404 => {
            tracing::debug!(pub_url = %url, "pub does not know this workspace yet");
            return Ok(IngestStats::default());
        }
        status if !(200..300).contains(&status) => {
            return Err(TransportError::UnexpectedStatus(status).into());
        }
        _ => {}
    }

    let items: Vec<serde_json::Value> = serde_json::from_str(&response.body)
        .map_err(|e| TransportError::MalformedBody(e.to_string()))?;

    let mut stats = IngestStats::default();
    for item in items {
        stats.total += 1;
        let accepted = match serde_json::from_value::<Document>(item) {
            Ok(doc) => storage.ingest(&doc, None).await?,
            Err(_) => false,
        };
        if accepted {
            stats.ingested += 1;
        } else {
            stats.ignored += 1;
        }
    }
    Ok(stats)
}

async fn push<T: Transport>(
    storage: &Storage,
    transport: &T,
    url: &str,
) -> Result<PushOutcome, PassError> {
    let docs = storage.query(&Query::history()).await?;
    let body =
        serde_json::to_string(&docs).map_err(|e| TransportError::MalformedBody(e.to_string()))?;

    let response = transport.post_json(url, body).await?;
    match response.status {
        404 => Ok(PushOutcome::NotAcceptingWorkspace),
        403 => Ok(PushOutcome::ReadOnly),
        status if (200..300).contains(&status) => {
            let stats: IngestStats = serde_json::from_str(&response.body)
                .map_err(|e| TransportError::MalformedBody(e.to_string()))?;
            Ok(PushOutcome::Accepted(stats))
        }
        status => Err(TransportError::UnexpectedStatus(status).into()),
    }
}
