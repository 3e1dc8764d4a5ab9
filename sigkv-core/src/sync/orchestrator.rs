//! Syncing one storage with a list of pubs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::{Storage, StorageError};

use super::remote::{sync_with_pub, SyncResult, Transport};

/// Pause after the last endpoint before the aggregate status is published.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointState {
    pub domain: String,
    pub status: SyncStatus,
    /// When the last successful pass finished.
    pub last_sync: Option<DateTime<Utc>>,
    pub last_result: Option<SyncResult>,
}

impl EndpointState {
    fn new(domain: String) -> Self {
        Self {
            domain,
            status: SyncStatus::Idle,
            last_sync: None,
            last_result: None,
        }
    }
}

/// Snapshot handed to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncState {
    pub status: SyncStatus,
    pub endpoints: Vec<EndpointState>,
}

type StateObserver = Box<dyn Fn(&SyncState) + Send + Sync>;

/// Normalize a pub address to a trimmed string with exactly one trailing `/`.
pub fn normalize_pub(domain: &str) -> String {
    format!("{}/", domain.trim().trim_end_matches('/'))
}

/// Runs sync passes against every configured pub, one after another.
pub struct SyncOrchestrator<T: Transport> {
    storage: Arc<Storage>,
    transport: T,
    endpoints: Vec<EndpointState>,
    status: SyncStatus,
    settle_delay: Duration,
    observers: Vec<(u64, StateObserver)>,
    next_observer_id: u64,
}

impl<T: Transport> SyncOrchestrator<T> {
    pub fn new(storage: Arc<Storage>, transport: T) -> Self {
        Self {
            storage,
            transport,
            endpoints: Vec::new(),
            status: SyncStatus::Idle,
            settle_delay: DEFAULT_SETTLE_DELAY,
            observers: Vec::new(),
            next_observer_id: 0,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Configured pubs, normalized, in the order they are synced.
    pub fn pubs(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.domain.clone()).collect()
    }

    pub fn state(&self) -> SyncState {
        SyncState {
            status: self.status,
            endpoints: self.endpoints.clone(),
        }
    }

    /// Add a pub. Returns false if it was already configured.
    pub fn add_pub(&mut self, domain: &str) -> bool {
        let domain = normalize_pub(domain);
        if self.endpoints.iter().any(|e| e.domain == domain) {
            return false;
        }
        tracing::info!(pub_url = %domain, "added pub");
        self.endpoints.push(EndpointState::new(domain));
        self.notify();
        true
    }

    /// Remove a pub. Returns false if it was not configured.
    pub fn remove_pub(&mut self, domain: &str) -> bool {
        let domain = normalize_pub(domain);
        let before = self.endpoints.len();
        self.endpoints.retain(|e| e.domain != domain);
        if self.endpoints.len() == before {
            return false;
        }
        tracing::info!(pub_url = %domain, "removed pub");
        if self.endpoints.is_empty() {
            self.status = SyncStatus::Idle;
        }
        self.notify();
        true
    }

    /// Register `observer` for state changes. Returns an id for [`Self::unsubscribe`].
    pub fn subscribe<F>(&mut self, observer: F) -> u64
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        let id = self.next_observer_id;
        self.next_observer_id += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: u64) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer_id, _)| *observer_id != id);
        self.observers.len() != before
    }

    /// Sync with every pub in order and return the final state.
    ///
    /// An unreachable pub only marks its endpoint as failed. A local storage
    /// failure stops the run and is returned after the endpoint's failure
    /// has been published.
    pub async fn sync_all(&mut self) -> Result<SyncState, StorageError> {
        if self.endpoints.is_empty() {
            self.status = SyncStatus::Idle;
            return Ok(self.state());
        }

        self.status = SyncStatus::Syncing;
        let mut any_success = false;

        for index in 0..self.endpoints.len() {
            self.endpoints[index].status = SyncStatus::Syncing;
            self.notify();

            let domain = self.endpoints[index].domain.clone();
            let outcome = sync_with_pub(&self.storage, &self.transport, &domain).await;

            let endpoint = &mut self.endpoints[index];
            match outcome {
                Ok(result) => {
                    if result.is_total_failure() {
                        endpoint.status = SyncStatus::Failure;
                    } else {
                        endpoint.status = SyncStatus::Success;
                        endpoint.last_sync = Some(Utc::now());
                        any_success = true;
                    }
                    endpoint.last_result = Some(result);
                    self.notify();
                }
                Err(e) => {
                    tracing::error!(pub_url = %domain, "storage failed during sync: {}", e);
                    endpoint.status = SyncStatus::Failure;
                    endpoint.last_result = Some(SyncResult::failed());
                    self.status = if any_success {
                        SyncStatus::Success
                    } else {
                        SyncStatus::Failure
                    };
                    self.notify();
                    return Err(e);
                }
            }
        }

        tokio::time::sleep(self.settle_delay).await;

        self.status = if any_success {
            SyncStatus::Success
        } else {
            SyncStatus::Failure
        };
        tracing::info!(status = ?self.status, endpoints = self.endpoints.len(), "sync run finished");
        self.notify();
        Ok(self.state())
    }

    fn notify(&self) {
        if self.observers.is_empty() {
            return;
        }
        let state = self.state();
        for (_, observer) in &self.observers {
            observer(&state);
        }
    }
}
