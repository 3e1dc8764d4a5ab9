//! Moving documents between storages, locally or through pubs.

mod error;
pub mod local;
pub mod orchestrator;
pub mod remote;

pub use error::{SyncError, TransportError};
pub use local::{merge_from, sync_local, LocalSyncOptions, LocalSyncReport, SyncDirection};
pub use orchestrator::{
    normalize_pub, EndpointState, SyncOrchestrator, SyncState, SyncStatus, DEFAULT_SETTLE_DELAY,
};
pub use remote::{
    documents_url, sync_with_pub, HttpTransport, IngestStats, PushOutcome, SyncResult, Transport,
    TransportResponse,
};
