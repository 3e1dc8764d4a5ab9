use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::{
    AuthorCommand, ConfigCommand, GetCommand, MergeCommand, QueryCommand, SetCommand, SyncCommand,
};
use config::Config;

#[derive(Parser)]
#[command(name = "sigkv")]
#[command(version)]
#[command(about = "Author-signed key/value documents, synced through pubs", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage author keypairs
    Author(AuthorCommand),

    /// Write a document
    Set(SetCommand),

    /// Show the winning document for a key
    Get(GetCommand),

    /// List documents
    Query(QueryCommand),

    /// Sync with another local database
    Merge(MergeCommand),

    /// Sync with configured pubs
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so command output stays clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sigkv=info,sigkv_core=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Author(cmd)) => cmd.run(&config).await?,
        Some(Commands::Set(cmd)) => cmd.run(&config).await?,
        Some(Commands::Get(cmd)) => cmd.run(&config).await?,
        Some(Commands::Query(cmd)) => cmd.run(&config).await?,
        Some(Commands::Merge(cmd)) => cmd.run(&config).await?,
        Some(Commands::Sync(cmd)) => cmd.run(&config).await?,
        Some(Commands::Config(cmd)) => cmd.run(&config)?,
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
