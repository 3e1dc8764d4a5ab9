use clap::{Args, Subcommand};

use sigkv_core::AuthorKeypair;

use super::{load_keypair, open_storage};
use crate::config::Config;

#[derive(Args)]
pub struct AuthorCommand {
    #[command(subcommand)]
    pub command: AuthorSubcommand,
}

#[derive(Subcommand)]
pub enum AuthorSubcommand {
    /// Generate a new author keypair and save it
    Generate {
        /// Four character shortname, e.g. "suzy"
        shortname: String,

        /// Overwrite an existing keypair file
        #[arg(long, short)]
        force: bool,
    },

    /// Show the address of the saved keypair
    Show,

    /// List every author with documents in the workspace
    List,
}

impl AuthorCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            AuthorSubcommand::Generate { shortname, force } => {
                let path = &config.keypair_path.value;
                if path.exists() && !force {
                    return Err(format!(
                        "Keypair file '{}' already exists. Use --force to replace it.",
                        path.display()
                    )
                    .into());
                }

                let keypair = AuthorKeypair::generate(shortname)?;
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, serde_json::to_string_pretty(&keypair)?)?;

                println!("Generated author {}", keypair.address);
                println!("Keypair saved to {}", path.display());
                Ok(())
            }

            AuthorSubcommand::Show => {
                let keypair = load_keypair(config)?;
                println!("{}", keypair.address);
                Ok(())
            }

            AuthorSubcommand::List => {
                let storage = open_storage(config).await?;
                let authors = storage.authors().await?;
                if authors.is_empty() {
                    println!("No authors found");
                    return Ok(());
                }
                for author in &authors {
                    println!("{}", author);
                }
                println!("\nTotal: {} author(s)", authors.len());
                Ok(())
            }
        }
    }
}
