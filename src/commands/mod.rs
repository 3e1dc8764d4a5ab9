mod author;
mod config_cmd;
mod doc;
mod merge;
mod sync_cmd;

pub use author::AuthorCommand;
pub use config_cmd::ConfigCommand;
pub use doc::{GetCommand, QueryCommand, SetCommand};
pub use merge::MergeCommand;
pub use sync_cmd::SyncCommand;

use clap::ValueEnum;
use std::path::Path;

use sigkv_core::{AuthorKeypair, Storage};

use crate::config::Config;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// The configured workspace, or an error explaining how to set one.
pub fn workspace(config: &Config) -> Result<&str, Box<dyn std::error::Error>> {
    config.workspace.value.as_deref().ok_or_else(|| {
        "No workspace configured. Set `workspace` in the config file or SIGKV_WORKSPACE.".into()
    })
}

/// Open the configured database for the configured workspace.
pub async fn open_storage(config: &Config) -> Result<Storage, Box<dyn std::error::Error>> {
    open_storage_at(&config.database_path.value, workspace(config)?).await
}

pub async fn open_storage_at(
    path: &Path,
    workspace: &str,
) -> Result<Storage, Box<dyn std::error::Error>> {
    Ok(Storage::open(path, workspace).await?)
}

/// Read the author keypair file.
pub fn load_keypair(config: &Config) -> Result<AuthorKeypair, Box<dyn std::error::Error>> {
    let path = &config.keypair_path.value;
    let contents = std::fs::read_to_string(path).map_err(|e| {
        format!(
            "Failed to read keypair '{}': {}. Run `sigkv author generate` first.",
            path.display(),
            e
        )
    })?;
    let keypair: AuthorKeypair = serde_json::from_str(&contents)
        .map_err(|e| format!("Invalid keypair file '{}': {}", path.display(), e))?;
    Ok(keypair)
}
