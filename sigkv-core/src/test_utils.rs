//! Helpers shared by the unit tests.

use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::crypto::AuthorKeypair;
use crate::document::Document;
use crate::storage::{Query, Storage};
use crate::sync::{IngestStats, Transport, TransportError, TransportResponse};
use crate::validator::{KvValidator, Validator};

pub const WORKSPACE: &str = "+garden.abc";

/// Fresh storage backed by a database in a temporary directory.
/// The directory must outlive the storage.
pub async fn setup_storage() -> (Storage, TempDir) {
    setup_storage_in(WORKSPACE).await
}

pub async fn setup_storage_in(workspace: &str) -> (Storage, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let storage = Storage::open(&db_path, workspace).await.unwrap();
    (storage, temp_dir)
}

pub fn keypair(shortname: &str) -> AuthorKeypair {
    AuthorKeypair::generate(shortname).unwrap()
}

/// A document in [`WORKSPACE`] signed by `keypair`.
pub fn signed_doc(keypair: &AuthorKeypair, key: &str, value: &str, timestamp: i64) -> Document {
    signed_doc_in(WORKSPACE, keypair, key, value, timestamp)
}

pub fn signed_doc_in(
    workspace: &str,
    keypair: &AuthorKeypair,
    key: &str,
    value: &str,
    timestamp: i64,
) -> Document {
    let doc = Document {
        schema_version: KvValidator::FORMAT.to_string(),
        workspace: workspace.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        timestamp,
        author: String::new(),
        signature: String::new(),
    };
    KvValidator.sign(doc, keypair).unwrap()
}

/// How a fake pub behaves.
pub enum FakeRemote {
    /// Every request fails to connect.
    Unreachable,
    /// Fixed status and body for GET and for POST.
    Scripted {
        get: (u16, String),
        post: (u16, String),
    },
    /// Serves and ingests documents like a real pub.
    Pub(Arc<Storage>),
}

impl FakeRemote {
    pub fn pub_for(storage: &Arc<Storage>) -> Self {
        FakeRemote::Pub(Arc::clone(storage))
    }
}

/// In-memory [`Transport`] routing requests by domain prefix.
#[derive(Default)]
pub struct FakeTransport {
    remotes: Vec<(String, FakeRemote)>,
    requests: Mutex<Vec<(String, String)>>,
    post_bodies: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote(mut self, domain: &str, remote: FakeRemote) -> Self {
        self.remotes.push((domain.to_string(), remote));
        self
    }

    /// `(method, url)` of every request made, in order.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_post_body(&self) -> Option<String> {
        self.post_bodies.lock().unwrap().last().cloned()
    }

    fn route(&self, method: &str, url: &str) -> Result<&FakeRemote, TransportError> {
        self.requests
            .lock()
            .unwrap()
            .push((method.to_string(), url.to_string()));
        self.remotes
            .iter()
            .find(|(domain, _)| url.starts_with(domain.as_str()))
            .map(|(_, remote)| remote)
            .ok_or_else(|| TransportError::Connection(format!("no route to {url}")))
    }
}

impl Transport for FakeTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
        match self.route("GET", url)? {
            FakeRemote::Unreachable => Err(TransportError::Connection("refused".to_string())),
            FakeRemote::Scripted { get, .. } => Ok(TransportResponse {
                status: get.0,
                body: get.1.clone(),
            }),
            FakeRemote::Pub(storage) => {
                let docs = storage.query(&Query::history()).await.unwrap();
                Ok(TransportResponse {
                    status: 200,
                    body: serde_json::to_string(&docs).unwrap(),
                })
            }
        }
    }

    async fn post_json(&self, url: &str, body: String) -> Result<TransportResponse, TransportError> {
        self.post_bodies.lock().unwrap().push(body.clone());
        match self.route("POST", url)? {
            FakeRemote::Unreachable => Err(TransportError::Connection("refused".to_string())),
            FakeRemote::Scripted { post, .. } => Ok(TransportResponse {
                status: post.0,
                body: post.1.clone(),
            }),
            FakeRemote::Pub(storage) => {
                let docs: Vec<Document> = serde_json::from_str(&body).unwrap();
                let mut stats = IngestStats::default();
                for doc in &docs {
                    stats.total += 1;
                    if storage.ingest(doc, None).await.unwrap() {
                        stats.ingested += 1;
                    } else {
                        stats.ignored += 1;
                    }
                }
                Ok(TransportResponse {
                    status: 200,
                    body: serde_json::to_string(&stats).unwrap(),
                })
            }
        }
    }
}
