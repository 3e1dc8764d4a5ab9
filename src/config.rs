use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

fn default_settle_delay_ms() -> u64 {
    1000
}

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Pub URLs, synced in order (e.g. "https://pub.example.com")
    #[serde(default)]
    pub pubs: Vec<String>,
    /// Pause after the last pub before reporting the overall result
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pubs: Vec::new(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite database
    pub database_path: ConfigValue<PathBuf>,
    /// Workspace commands operate on, e.g. "+garden.abc"
    pub workspace: ConfigValue<Option<String>>,
    /// Author keypair file written by `sigkv author generate`
    pub keypair_path: ConfigValue<PathBuf>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    /// Sync configuration
    pub sync: SyncConfig,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    workspace: Option<String>,
    keypair_path: Option<PathBuf>,
    sync: Option<SyncConfig>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        Self::load_with_env(config_path, |name| std::env::var(name).ok())
    }

    /// Like [`Config::load`], reading environment variables through `env`.
    pub fn load_with_env<F>(config_path: Option<PathBuf>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Start with defaults
        let mut database_path = ConfigValue::new(
            Self::default_data_dir().join("sigkv.db"),
            ConfigSource::Default,
        );
        let mut workspace = ConfigValue::new(None, ConfigSource::Default);
        let mut keypair_path = ConfigValue::new(
            Self::default_config_dir().join("keypair.json"),
            ConfigSource::Default,
        );
        let mut config_file = None;
        let mut sync = SyncConfig::default();

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            // Resolve relative paths against config file's directory
            let resolve = |p: PathBuf| {
                if p.is_relative() {
                    path.parent().map(|dir| dir.join(&p)).unwrap_or(p)
                } else {
                    p
                }
            };

            if let Some(db_path) = file_config.database_path {
                database_path = ConfigValue::new(resolve(db_path), ConfigSource::File);
            }
            if let Some(ws) = file_config.workspace {
                workspace = ConfigValue::new(Some(ws), ConfigSource::File);
            }
            if let Some(kp_path) = file_config.keypair_path {
                keypair_path = ConfigValue::new(resolve(kp_path), ConfigSource::File);
            }
            if let Some(sync_config) = file_config.sync {
                sync = sync_config;
            }
        }

        // Apply environment variable overrides
        if let Some(db_path) = env("SIGKV_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Some(ws) = env("SIGKV_WORKSPACE") {
            workspace = ConfigValue::new(Some(ws), ConfigSource::Environment);
        }
        if let Some(kp_path) = env("SIGKV_KEYPAIR_PATH") {
            keypair_path = ConfigValue::new(PathBuf::from(kp_path), ConfigSource::Environment);
        }
        if let Some(pubs) = env("SIGKV_PUBS") {
            sync.pubs = pubs
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect();
        }

        Ok(Self {
            database_path,
            workspace,
            keypair_path,
            config_file,
            sync,
        })
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/sigkv/
    /// - macOS: ~/Library/Application Support/sigkv/
    /// - Windows: %APPDATA%/sigkv/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sigkv")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/sigkv/
    /// - macOS: ~/Library/Application Support/sigkv/
    /// - Windows: %APPDATA%/sigkv/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sigkv")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
