//! sigkv pub server
//!
//! Hosts workspaces over HTTP so sigkv clients can sync through it. Any
//! client may pull; pushed documents are validated and ingested like any
//! other document, so the pub keeps the same per-author newest rows as
//! every client.
//!
//! # Configuration
//!
//! Environment variables:
//! - `SIGKV_PORT`: Port to listen on (default: 8080)
//! - `SIGKV_DATA_DIR`: Directory for the database (default: ~/.local/share/sigkv-pub)
//! - `SIGKV_READ_ONLY`: Refuse all pushes with 403 (default: false)
//! - `SIGKV_ACCEPT_NEW_WORKSPACES`: Accept pushes for workspaces this pub
//!   has never stored (default: true)
//! - `SIGKV_MAX_BODY_BYTES`: Largest accepted push body (default: 256 MiB)
//!
//! # Endpoints
//!
//! - `GET /health`: Health check
//! - `GET /documents-collection/{workspace}`: Every stored document, or 404
//!   if the workspace is unknown
//! - `POST /documents-collection/{workspace}`: Ingest a JSON array of
//!   documents and answer with ingest counts

use axum::{
    body::Body,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use sigkv_core::sync::IngestStats;
use sigkv_core::{init_db, Document, Query, Storage, StorageError};
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::path::PathBuf;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// ============================================================================
// Configuration
// ============================================================================

/// Server configuration
#[derive(Debug, Clone)]
struct Config {
    /// Port to listen on
    port: u16,
    /// Directory holding the pub database
    data_dir: PathBuf,
    /// Refuse every push
    read_only: bool,
    /// Accept pushes for workspaces not yet stored
    accept_new_workspaces: bool,
    /// Largest push body read into memory
    max_body_bytes: usize,
}

/// Default for `SIGKV_MAX_BODY_BYTES`. Pushes carry every retained row of a workspace.
const DEFAULT_MAX_BODY_BYTES: usize = 256 * 1024 * 1024;

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = env("SIGKV_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let data_dir = env("SIGKV_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("sigkv-pub")
            });

        let read_only = env("SIGKV_READ_ONLY")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(false);
        let accept_new_workspaces = env("SIGKV_ACCEPT_NEW_WORKSPACES")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(true);
        let max_body_bytes = env("SIGKV_MAX_BODY_BYTES")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_BODY_BYTES);

        Self {
            port,
            data_dir,
            read_only,
            accept_new_workspaces,
            max_body_bytes,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ============================================================================
// State and errors
// ============================================================================

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    pool: SqlitePool,
    read_only: bool,
    accept_new_workspaces: bool,
    max_body_bytes: usize,
}

impl AppState {
    /// Storage for `workspace` on the shared pool.
    fn storage(&self, workspace: &str) -> Result<Storage, ApiError> {
        Ok(Storage::new(self.pool.clone(), workspace)?)
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

#[derive(Debug)]
enum ApiError {
    InvalidWorkspace(String),
    UnknownWorkspace(String),
    ReadOnly,
    PayloadTooLarge(usize),
    MalformedBody(String),
    Storage(StorageError),
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::InvalidWorkspace(workspace) => ApiError::InvalidWorkspace(workspace),
            e => ApiError::Storage(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::InvalidWorkspace(workspace) => (
                StatusCode::BAD_REQUEST,
                "invalid_workspace",
                format!("Invalid workspace: {}", workspace),
            ),
            ApiError::UnknownWorkspace(workspace) => (
                StatusCode::NOT_FOUND,
                "unknown_workspace",
                format!("This pub does not host {}", workspace),
            ),
            ApiError::ReadOnly => (
                StatusCode::FORBIDDEN,
                "read_only",
                "This pub does not accept writes".to_string(),
            ),
            ApiError::PayloadTooLarge(limit) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                format!("Request body exceeds {} bytes", limit),
            ),
            ApiError::MalformedBody(e) => (
                StatusCode::BAD_REQUEST,
                "malformed_body",
                format!("Expected a JSON array of documents: {}", e),
            ),
            ApiError::Storage(e) => {
                tracing::error!("storage error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage_error",
                    "Internal storage error".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { error, message })).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Every document stored for the workspace, all authors included.
async fn get_documents(
    State(state): State<AppState>,
    Path(workspace): Path<String>,
) -> Result<Json<Vec<Document>>, ApiError> {
    let storage = state.storage(&workspace)?;
    if !storage.has_documents().await? {
        return Err(ApiError::UnknownWorkspace(workspace));
    }
    let docs = storage.query(&Query::history()).await?;
    tracing::debug!(%workspace, count = docs.len(), "serving documents");
    Ok(Json(docs))
}

/// Ingest pushed documents. Elements that are not documents count as ignored.
///
/// The body is only read once the pub has agreed to take the push.
async fn post_documents(
    State(state): State<AppState>,
    Path(workspace): Path<String>,
    body: Body,
) -> Result<Json<IngestStats>, ApiError> {
    let storage = state.storage(&workspace)?;
    if state.read_only {
        return Err(ApiError::ReadOnly);
    }
    if !state.accept_new_workspaces && !storage.has_documents().await? {
        return Err(ApiError::UnknownWorkspace(workspace));
    }

    let bytes = axum::body::to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|_| ApiError::PayloadTooLarge(state.max_body_bytes))?;
    let items: Vec<serde_json::Value> =
        serde_json::from_slice(&bytes).map_err(|e| ApiError::MalformedBody(e.to_string()))?;

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

    tracing::info!(
        %workspace,
        ingested = stats.ingested,
        ignored = stats.ignored,
        "ingested pushed documents"
    );
    Ok(Json(stats))
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/documents-collection/{workspace}",
            get(get_documents).post(post_documents),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sigkv_pub=info,sigkv_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();
    tracing::info!("Data directory: {}", config.data_dir.display());
    if config.read_only {
        tracing::info!("Read-only mode: pushes will be refused");
    }
    if !config.accept_new_workspaces {
        tracing::info!("Only accepting pushes for workspaces already hosted");
    }

    let pool = match init_db(&config.data_dir.join("pub.db")).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    let state = AppState {
        pool,
        read_only: config.read_only,
        accept_new_workspaces: config.accept_new_workspaces,
        max_body_bytes: config.max_body_bytes,
    };

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app(state)).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
