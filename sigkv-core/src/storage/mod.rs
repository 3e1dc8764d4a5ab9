//! SQLite-backed document storage for one workspace.
//!
//! A [`Storage`] keeps at most one row per `(key, author)`: the newest
//! document that author has ever published for the key, ordered by
//! `(timestamp, signature)`. Winners across authors are picked at read time.
//!
//! All writes go through [`Storage::ingest`]. The acceptance check and the
//! write happen in one conditional upsert, so concurrent ingestion for the
//! same `(key, author)` always keeps the newest document.

mod query;

pub use query::Query;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use crate::crypto::{AuthorKeypair, CryptoError};
use crate::document::{default_future_cutoff, now_micros, Document};
use crate::validator::{is_valid_workspace, KvValidator, Validator};

/// Errors from the storage layer. Rejected documents are not errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("failed to create database directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),
    #[error("invalid workspace address '{0}'")]
    InvalidWorkspace(String),
    #[error("failed to sign document: {0}")]
    Signing(#[from] CryptoError),
}

/// Open (creating if needed) the SQLite database at `path` and run migrations.
pub async fn init_db(path: &Path) -> Result<SqlitePool, StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| StorageError::CreateDir(parent.to_path_buf(), e))?;
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());
    let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// All workspaces with at least one stored document.
pub async fn list_workspaces(pool: &SqlitePool) -> Result<Vec<String>, StorageError> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT DISTINCT workspace FROM documents ORDER BY workspace")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(w,)| w).collect())
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    schema_version: String,
    workspace: String,
    key: String,
    value: String,
    timestamp: i64,
    author: String,
    signature: String,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Document {
            schema_version: row.schema_version,
            workspace: row.workspace,
            key: row.key,
            value: row.value,
            timestamp: row.timestamp,
            author: row.author,
            signature: row.signature,
        }
    }
}

/// A write request from a local author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetRequest {
    pub key: String,
    pub value: String,
    /// Requested timestamp; defaults to now. Raised if needed so the write
    /// supersedes the current winner.
    pub timestamp: Option<i64>,
    /// Defaults to the validator's format.
    pub schema_version: Option<String>,
}

impl SetRequest {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            timestamp: None,
            schema_version: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_schema_version(mut self, schema_version: impl Into<String>) -> Self {
        self.schema_version = Some(schema_version.into());
        self
    }
}

/// Emitted to observers after a document is stored.
#[derive(Debug, Clone)]
pub struct WriteEvent {
    pub document: Document,
    /// Written through [`Storage::set`] rather than received from elsewhere.
    pub is_local: bool,
    /// The document is now the winner for its key.
    pub is_latest: bool,
    /// The author had no stored document for this key before.
    pub is_first_from_author: bool,
}

/// Whether write events for an author's first document at a key are
/// delivered to observers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NewAuthorPolicy {
    #[default]
    Include,
    Exclude,
}

type WriteObserver = Box<dyn Fn(&WriteEvent) + Send + Sync>;

/// Document storage for a single workspace.
pub struct Storage {
    id: Uuid,
    pool: SqlitePool,
    workspace: String,
    validator: Arc<dyn Validator>,
    new_author_policy: NewAuthorPolicy,
    observers: Mutex<Vec<(u64, WriteObserver)>>,
    next_observer_id: AtomicU64,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("id", &self.id)
            .field("workspace", &self.workspace)
            .field("new_author_policy", &self.new_author_policy)
            .finish_non_exhaustive()
    }
}

impl Storage {
    /// Creates storage for `workspace` on an already migrated pool.
    ///
    /// Several workspaces may share one pool.
    pub fn new(pool: SqlitePool, workspace: impl Into<String>) -> Result<Self, StorageError> {
        let workspace = workspace.into();
        if !is_valid_workspace(&workspace) {
            return Err(StorageError::InvalidWorkspace(workspace));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            pool,
            workspace,
            validator: Arc::new(KvValidator),
            new_author_policy: NewAuthorPolicy::default(),
            observers: Mutex::new(Vec::new()),
            next_observer_id: AtomicU64::new(0),
        })
    }

    /// Opens the database file at `path` and creates storage for `workspace`.
    pub async fn open(path: &Path, workspace: impl Into<String>) -> Result<Self, StorageError> {
        let pool = init_db(path).await?;
        Self::new(pool, workspace)
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_new_author_policy(mut self, policy: NewAuthorPolicy) -> Self {
        self.new_author_policy = policy;
        self
    }

    /// Identifies this instance; two handles are the same storage iff their ids match.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========== Read operations ==========

    /// Documents matching `query`, ordered by key, then newest first.
    pub async fn query(&self, query: &Query) -> Result<Vec<Document>, StorageError> {
        if query.limit == Some(0) {
            return Ok(Vec::new());
        }
        let mut qb = query::build_select(&self.workspace, query);
        let rows: Vec<DocumentRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Document::from).collect())
    }

    /// Distinct keys matching `query`. History is ignored so `limit` counts keys.
    pub async fn keys(&self, query: &Query) -> Result<Vec<String>, StorageError> {
        let query = query.clone().with_history(false);
        let docs = self.query(&query).await?;
        Ok(docs.into_iter().map(|d| d.key).collect())
    }

    /// Values of the documents matching `query`.
    pub async fn values(&self, query: &Query) -> Result<Vec<String>, StorageError> {
        let docs = self.query(query).await?;
        Ok(docs.into_iter().map(|d| d.value).collect())
    }

    /// The current winner for `key`, if any author has written it.
    pub async fn get_latest(&self, key: &str) -> Result<Option<Document>, StorageError> {
        let query = Query::new().with_key(key).with_limit(1);
        Ok(self.query(&query).await?.into_iter().next())
    }

    pub async fn get_value(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.get_latest(key).await?.map(|d| d.value))
    }

    /// Every author with at least one stored document, sorted.
    pub async fn authors(&self) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT author FROM documents WHERE workspace = ? ORDER BY author",
        )
        .bind(&self.workspace)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(a,)| a).collect())
    }

    /// Whether any document is stored for this workspace.
    pub async fn has_documents(&self) -> Result<bool, StorageError> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM documents WHERE workspace = ?)")
                .bind(&self.workspace)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn get_by_author(&self, key: &str, author: &str) -> Result<Option<Document>, StorageError> {
        let row: Option<DocumentRow> = sqlx::query_as(
            "SELECT * FROM documents WHERE workspace = ? AND key = ? AND author = ?",
        )
        .bind(&self.workspace)
        .bind(key)
        .bind(author)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Document::from))
    }

    // ========== Write operations ==========

    /// Offer a document to this storage.
    ///
    /// Returns `Ok(true)` if it was stored, `Ok(false)` if it was invalid,
    /// from the future (beyond `future_cutoff`, default now + 10 minutes),
    /// for another workspace, or not newer than the author's stored document
    /// for the key. Only database failures are errors.
    pub async fn ingest(
        &self,
        doc: &Document,
        future_cutoff: Option<i64>,
    ) -> Result<bool, StorageError> {
        self.ingest_inner(doc, future_cutoff, false).await
    }

    async fn ingest_inner(
        &self,
        doc: &Document,
        future_cutoff: Option<i64>,
        is_local: bool,
    ) -> Result<bool, StorageError> {
        if doc.workspace != self.workspace {
            tracing::debug!(workspace = %doc.workspace, "ignoring document from another workspace");
            return Ok(false);
        }
        let cutoff = future_cutoff.unwrap_or_else(default_future_cutoff);
        if !self.validator.is_valid(doc, cutoff) {
            return Ok(false);
        }

        let existing = self.get_by_author(&doc.key, &doc.author).await?;
        if let Some(existing) = &existing {
            if !doc.is_newer_than(existing) {
                tracing::debug!(key = %doc.key, author = %doc.author, "ignoring stale document");
                return Ok(false);
            }
        }

        // The WHERE clause repeats the staleness check inside the write so a
        // concurrent ingest for the same (key, author) cannot be overwritten
        // by an older document.
        let result = sqlx::query(
            r#"
            INSERT INTO documents (schema_version, workspace, key, value, timestamp, author, signature)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (workspace, key, author) DO UPDATE SET
                schema_version = excluded.schema_version,
                value = excluded.value,
                timestamp = excluded.timestamp,
                signature = excluded.signature
            WHERE excluded.timestamp > documents.timestamp
               OR (excluded.timestamp = documents.timestamp
                   AND excluded.signature > documents.signature)
            "#,
        )
        .bind(&doc.schema_version)
        .bind(&doc.workspace)
        .bind(&doc.key)
        .bind(&doc.value)
        .bind(doc.timestamp)
        .bind(&doc.author)
        .bind(&doc.signature)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(key = %doc.key, author = %doc.author, "lost race to a newer document");
            return Ok(false);
        }

        tracing::trace!(key = %doc.key, author = %doc.author, timestamp = doc.timestamp, "stored document");
        self.notify_write(doc, is_local, existing.is_none()).await?;
        Ok(true)
    }

    /// Write `request` as the author of `keypair`.
    ///
    /// The timestamp is raised above the current winner's so a local write
    /// always becomes the new winner, even when the local clock is behind.
    pub async fn set(
        &self,
        keypair: &AuthorKeypair,
        request: SetRequest,
    ) -> Result<bool, StorageError> {
        let mut timestamp = request.timestamp.unwrap_or_else(now_micros);
        if let Some(latest) = self.get_latest(&request.key).await? {
            timestamp = timestamp.max(latest.timestamp + 1);
        }

        let doc = Document {
            schema_version: request
                .schema_version
                .unwrap_or_else(|| self.validator.format().to_string()),
            workspace: self.workspace.clone(),
            key: request.key,
            value: request.value,
            timestamp,
            author: keypair.address.clone(),
            signature: String::new(),
        };
        let doc = self.validator.sign(doc, keypair)?;

        self.ingest_inner(&doc, Some(doc.timestamp), true).await
    }

    // ========== Observers ==========

    /// Register `observer` for write events. Returns an id for [`Self::unsubscribe`].
    ///
    /// Observers run synchronously on the writing task and must not call
    /// back into `subscribe`/`unsubscribe`.
    pub fn subscribe<F>(&self, observer: F) -> u64
    where
        F: Fn(&WriteEvent) + Send + Sync + 'static,
    {
        let id = self.next_observer_id.fetch_add(1, Ordering::Relaxed);
        self.lock_observers().push((id, Box::new(observer)));
        id
    }

    /// Remove an observer. Returns false if `id` was not registered.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut observers = self.lock_observers();
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }

    fn lock_observers(&self) -> std::sync::MutexGuard<'_, Vec<(u64, WriteObserver)>> {
        // A panicking observer must not disable the others.
        self.observers.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn notify_write(
        &self,
        doc: &Document,
        is_local: bool,
        is_first_from_author: bool,
    ) -> Result<(), StorageError> {
        let has_observers = !self.lock_observers().is_empty();
        if !has_observers {
            return Ok(());
        }
        if is_first_from_author && self.new_author_policy == NewAuthorPolicy::Exclude {
            return Ok(());
        }

        let is_latest = self
            .get_latest(&doc.key)
            .await?
            .is_some_and(|latest| latest.signature == doc.signature && latest.author == doc.author);
        let event = WriteEvent {
            document: doc.clone(),
            is_local,
            is_latest,
            is_first_from_author,
        };
        for (_, observer) in self.lock_observers().iter() {
            observer(&event);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
