//! Sync CLI commands for synchronizing with pubs.

use clap::{Args, Subcommand};
use std::sync::Arc;
use std::time::Duration;

use sigkv_core::sync::{EndpointState, PushOutcome};
use sigkv_core::{HttpTransport, Storage, StorageError, SyncOrchestrator, SyncStatus, TransportError};

use crate::config::Config;

/// Sync with configured pubs
#[derive(Debug, Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,
}

#[derive(Debug, Subcommand)]
enum SyncSubcommand {
    /// Show sync configuration
    Status,
}

impl SyncCommand {
    pub async fn run(&self, config: &Config) -> Result<(), SyncCommandError> {
        match &self.command {
            None => self.sync(config).await,
            Some(SyncSubcommand::Status) => {
                self.status(config);
                Ok(())
            }
        }
    }

    async fn sync(&self, config: &Config) -> Result<(), SyncCommandError> {
        if config.sync.pubs.is_empty() {
            return Err(SyncCommandError::NotConfigured);
        }
        let workspace = config
            .workspace
            .value
            .as_deref()
            .ok_or(SyncCommandError::NoWorkspace)?;

        let storage = Storage::open(&config.database_path.value, workspace).await?;
        let transport = HttpTransport::new()?;
        let mut orchestrator = SyncOrchestrator::new(Arc::new(storage), transport)
            .with_settle_delay(Duration::from_millis(config.sync.settle_delay_ms));
        for domain in &config.sync.pubs {
            orchestrator.add_pub(domain);
        }

        println!("Syncing {} with {} pub(s)...", workspace, config.sync.pubs.len());
        println!();

        let state = orchestrator.sync_all().await?;
        for endpoint in &state.endpoints {
            println!("  {}", describe(endpoint));
        }

        println!();
        match state.status {
            SyncStatus::Success => {
                println!("Sync complete.");
                Ok(())
            }
            _ => Err(SyncCommandError::AllFailed),
        }
    }

    fn status(&self, config: &Config) {
        println!("Sync Configuration");
        println!("==================");
        println!();

        println!(
            "Workspace: {}",
            config.workspace.value.as_deref().unwrap_or("(not set)")
        );

        if config.sync.pubs.is_empty() {
            println!("Pubs:      (none)");
            println!();
            println!("To enable sync, add to your config file:");
            println!();
            println!("  sync:");
            println!("    pubs:");
            println!("      - \"https://pub.example.com\"");
            println!();
            println!("Or set the environment variable:");
            println!("  SIGKV_PUBS=https://a.example.com,https://b.example.com");
            return;
        }

        println!("Pubs:");
        for domain in &config.sync.pubs {
            println!("  {}", domain);
        }
        println!("Settle delay: {}ms", config.sync.settle_delay_ms);
    }
}

fn describe(endpoint: &EndpointState) -> String {
    let Some(result) = endpoint.last_result.filter(|r| !r.is_total_failure()) else {
        return format!("✗ {} unreachable", endpoint.domain);
    };

    let pull = match result.pull {
        Some(stats) => format!("pulled {} new of {}", stats.ingested, stats.total),
        None => "pull failed".to_string(),
    };
    let push = match result.push {
        Some(PushOutcome::Accepted(stats)) => {
            format!("pushed {} new of {}", stats.ingested, stats.total)
        }
        Some(PushOutcome::NotAcceptingWorkspace) => "pub does not accept this workspace".to_string(),
        Some(PushOutcome::ReadOnly) => "pub is read-only".to_string(),
        None => "push failed".to_string(),
    };
    format!("✓ {} {}, {}", endpoint.domain, pull, push)
}

/// Errors from sync commands
#[derive(Debug)]
pub enum SyncCommandError {
    NotConfigured,
    NoWorkspace,
    AllFailed,
    Transport(TransportError),
    Storage(StorageError),
}

impl std::fmt::Display for SyncCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCommandError::NotConfigured => {
                write!(f, "No pubs configured. Run `sigkv sync status` for setup help.")
            }
            SyncCommandError::NoWorkspace => write!(f, "No workspace configured"),
            SyncCommandError::AllFailed => write!(f, "Sync failed with every pub"),
            SyncCommandError::Transport(e) => write!(f, "{}", e),
            SyncCommandError::Storage(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SyncCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncCommandError::Transport(e) => Some(e),
            SyncCommandError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for SyncCommandError {
    fn from(e: TransportError) -> Self {
        SyncCommandError::Transport(e)
    }
}

impl From<StorageError> for SyncCommandError {
    fn from(e: StorageError) -> Self {
        SyncCommandError::Storage(e)
    }
}
