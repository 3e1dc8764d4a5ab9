use clap::{Args, ValueEnum};
use std::path::PathBuf;

use sigkv_core::{sync_local, LocalSyncOptions, SyncDirection};

use super::{open_storage, open_storage_at, workspace};
use crate::config::Config;

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum Direction {
    /// Copy documents from the other database into this one
    Pull,
    /// Copy documents from this database into the other one
    Push,
    #[default]
    Both,
}

impl From<Direction> for SyncDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Pull => SyncDirection::Pull,
            Direction::Push => SyncDirection::Push,
            Direction::Both => SyncDirection::Both,
        }
    }
}

/// Sync the configured workspace with another local database
#[derive(Args)]
pub struct MergeCommand {
    /// Path to the other SQLite database
    other: PathBuf,

    /// Which way documents flow
    #[arg(long, short, value_enum, default_value = "both")]
    direction: Direction,

    /// Only copy the winning document for each key
    #[arg(long)]
    winners_only: bool,

    /// Keep syncing as documents change (not supported)
    #[arg(long)]
    live: bool,
}

impl MergeCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        // Opening creates missing databases; a mistyped path must not.
        if !self.other.is_file() {
            return Err(format!("Database not found: {}", self.other.display()).into());
        }
        let local = open_storage(config).await?;
        let other = open_storage_at(&self.other, workspace(config)?).await?;

        let options = LocalSyncOptions {
            direction: self.direction.into(),
            include_history: !self.winners_only,
            live: self.live,
        };
        let report = sync_local(&local, &other, &options).await?;

        println!("Pulled {} document(s)", report.pulled);
        println!("Pushed {} document(s)", report.pushed);
        Ok(())
    }
}
