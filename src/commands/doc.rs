use chrono::DateTime;
use clap::Args;

use sigkv_core::{Document, Query, SetRequest};

use super::{load_keypair, open_storage, OutputFormat};
use crate::config::Config;

/// Write a value as the configured author
#[derive(Args)]
pub struct SetCommand {
    /// Document key, e.g. "wiki/shared/Bumblebee"
    key: String,

    /// New value
    value: String,

    /// Timestamp in microseconds (default: now, or just after the current winner)
    #[arg(long)]
    timestamp: Option<i64>,
}

impl SetCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let keypair = load_keypair(config)?;
        let storage = open_storage(config).await?;

        let mut request = SetRequest::new(&self.key, &self.value);
        if let Some(timestamp) = self.timestamp {
            request = request.with_timestamp(timestamp);
        }

        if !storage.set(&keypair, request).await? {
            return Err(format!("Document for '{}' was rejected", self.key).into());
        }
        println!("Set {}", self.key);
        Ok(())
    }
}

/// Show the winning document for a key
#[derive(Args)]
pub struct GetCommand {
    key: String,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl GetCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let storage = open_storage(config).await?;
        let doc = storage
            .get_latest(&self.key)
            .await?
            .ok_or_else(|| format!("Document not found: {}", self.key))?;

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&doc)?),
            OutputFormat::Text => {
                println!("{}", doc);
                println!("  written:   {}", format_timestamp(doc.timestamp));
            }
        }
        Ok(())
    }
}

/// List documents matching a filter
#[derive(Args)]
pub struct QueryCommand {
    /// Keys starting with this string
    #[arg(long)]
    prefix: Option<String>,

    /// Inclusive lower bound on the key
    #[arg(long)]
    low_key: Option<String>,

    /// Exclusive upper bound on the key
    #[arg(long)]
    high_key: Option<String>,

    /// Maximum number of documents
    #[arg(long)]
    limit: Option<u64>,

    /// Include every author's document, not only the winner per key
    #[arg(long)]
    history: bool,

    /// Print only the matching keys
    #[arg(long, conflicts_with = "history")]
    keys: bool,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl QueryCommand {
    fn query(&self) -> Query {
        Query {
            key: None,
            low_key: self.low_key.clone(),
            high_key: self.high_key.clone(),
            prefix: self.prefix.clone(),
            limit: self.limit,
            include_history: self.history,
        }
    }

    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let storage = open_storage(config).await?;
        let query = self.query();

        if self.keys {
            let keys = storage.keys(&query).await?;
            match self.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&keys)?),
                OutputFormat::Text => {
                    for key in &keys {
                        println!("{}", key);
                    }
                }
            }
            return Ok(());
        }

        let docs = storage.query(&query).await?;
        if docs.is_empty() {
            println!("No documents found");
            return Ok(());
        }

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&docs)?),
            OutputFormat::Text => print_table(&docs),
        }
        Ok(())
    }
}

fn print_table(docs: &[Document]) {
    println!("{:<30}  {:<20}  {:<19}  VALUE", "KEY", "AUTHOR", "WRITTEN");
    println!("{}", "-".repeat(90));
    for doc in docs {
        println!(
            "{:<30}  {:<20}  {:<19}  {}",
            truncate(&doc.key, 30),
            truncate(&doc.author, 20),
            format_timestamp(doc.timestamp),
            truncate(&doc.value, 40)
        );
    }
    println!("\nTotal: {} document(s)", docs.len());
}

fn format_timestamp(micros: i64) -> String {
    DateTime::from_timestamp_micros(micros)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| micros.to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let kept: String = s.chars().take(max - 3).collect();
        format!("{}...", kept)
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 10), "abcdefg...");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
        assert_eq!(format_timestamp(1_500_000_000_000_000), "2017-07-14 02:40:00");
    }
}
