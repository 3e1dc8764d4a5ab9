//! Merging two storages directly, without a network in between.

use crate::storage::{Query, Storage, StorageError};

use super::error::SyncError;

/// Which way documents flow relative to the first storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncDirection {
    /// Other → local.
    Pull,
    /// Local → other.
    Push,
    #[default]
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSyncOptions {
    pub direction: SyncDirection,
    /// Send every author's row rather than only the winner per key.
    pub include_history: bool,
    /// Keep syncing as new documents arrive. Not supported.
    pub live: bool,
}

impl Default for LocalSyncOptions {
    fn default() -> Self {
        Self {
            direction: SyncDirection::Both,
            include_history: true,
            live: false,
        }
    }
}

/// Documents accepted in each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalSyncReport {
    pub pulled: usize,
    pub pushed: usize,
}

/// Ingest every document from `other` into `local`.
///
/// Returns how many were accepted. Because ingestion keeps the newest
/// document per `(key, author)`, the resulting contents do not depend on the
/// order documents arrive in, and repeating a merge accepts nothing new.
pub async fn merge_from(
    local: &Storage,
    other: &Storage,
    include_history: bool,
) -> Result<usize, StorageError> {
    let docs = other
        .query(&Query::new().with_history(include_history))
        .await?;

    let mut accepted = 0;
    for doc in &docs {
        if local.ingest(doc, None).await? {
            accepted += 1;
        }
    }

    tracing::debug!(
        from = %other.id(),
        into = %local.id(),
        offered = docs.len(),
        accepted,
        "merged documents"
    );
    Ok(accepted)
}

/// Sync `local` with `other` according to `options`.
///
/// Syncing a storage with itself or with a different workspace does
/// nothing. With [`SyncDirection::Both`], a failed pull is reported only
/// after the push has been attempted.
pub async fn sync_local(
    local: &Storage,
    other: &Storage,
    options: &LocalSyncOptions,
) -> Result<LocalSyncReport, SyncError> {
    if options.live {
        return Err(SyncError::LiveSyncUnsupported);
    }
    if local.id() == other.id() {
        tracing::debug!("not syncing storage with itself");
        return Ok(LocalSyncReport::default());
    }
    if local.workspace() != other.workspace() {
        tracing::warn!(
            local = local.workspace(),
            other = other.workspace(),
            "not syncing storages for different workspaces"
        );
        return Ok(LocalSyncReport::default());
    }

    let mut report = LocalSyncReport::default();
    let mut pull_error = None;

    if matches!(options.direction, SyncDirection::Pull | SyncDirection::Both) {
        match merge_from(local, other, options.include_history).await {
            Ok(pulled) => report.pulled = pulled,
            Err(e) => {
                tracing::warn!("pull failed: {}", e);
                pull_error = Some(e);
            }
        }
    }
    if matches!(options.direction, SyncDirection::Push | SyncDirection::Both) {
        report.pushed = merge_from(other, local, options.include_history).await?;
    }

    match pull_error {
        Some(e) => Err(e.into()),
        None => Ok(report),
    }
}
