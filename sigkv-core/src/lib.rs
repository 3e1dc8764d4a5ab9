//! sigkv core library
//!
//! Author-signed key/value documents, their SQLite storage, and syncing
//! between storages directly or through HTTP pubs.

pub mod crypto;
pub mod document;
pub mod storage;
pub mod sync;
pub mod validator;

#[cfg(test)]
mod test_utils;

pub use crypto::{AuthorAddress, AuthorKeypair, CryptoError};
pub use document::{default_future_cutoff, now_micros, Document, MAX_TIMESTAMP};
pub use storage::{
    init_db, list_workspaces, NewAuthorPolicy, Query, SetRequest, Storage, StorageError,
    WriteEvent,
};
pub use sync::{
    sync_local, sync_with_pub, HttpTransport, LocalSyncOptions, LocalSyncReport, SyncDirection,
    SyncError, SyncOrchestrator, SyncResult, SyncState, SyncStatus, Transport, TransportError,
};
pub use validator::{KvValidator, Validator};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
