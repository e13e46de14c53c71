//! Configuration management for osspilot

use crate::error::{Error, Result};
use crate::limits::{
    EndpointLimitTable, DEFAULT_FALLBACK_PER_MINUTE, DEFAULT_HOST, DEFAULT_STORAGE_PER_MINUTE,
};
use crate::recombination::RecombinationConfig;
use crate::upload::{UploadConfig, DEFAULT_CHUNKING_THRESHOLD, DEFAULT_CHUNK_SIZE};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration directory name
const CONFIG_DIR: &str = "osspilot";

/// Configuration file name
const CONFIG_FILE: &str = "config.toml";

/// Environment variable taking precedence over `[auth] access_token`
pub const ACCESS_TOKEN_ENV: &str = "OSSPILOT_ACCESS_TOKEN";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub service: ServiceConfig,
    pub auth: AuthConfig,
    pub limits: LimitsConfig,
    pub upload: UploadSettings,
    pub recombination: RecombinationSettings,
    pub logging: LoggingConfig,
}

/// Service location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Host of both the data management and object storage APIs
    pub host: String,
    pub scheme: String,
    pub buckets_path: String,
    /// Per-request timeout in seconds
    pub request_timeout: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            scheme: "https".to_string(),
            buckets_path: "/oss/v2/buckets".to_string(),
            request_timeout: 300,
        }
    }
}

/// Authentication
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// Rate limit ceilings not covered by the per-endpoint table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub storage_per_minute: u32,
    pub fallback_per_minute: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            storage_per_minute: DEFAULT_STORAGE_PER_MINUTE,
            fallback_per_minute: DEFAULT_FALLBACK_PER_MINUTE,
        }
    }
}

/// Upload settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Payloads strictly larger than this many bytes are chunked
    pub chunking_threshold: u64,
    /// Bytes per chunk
    pub chunk_size: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            chunking_threshold: DEFAULT_CHUNKING_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Recombination polling, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecombinationSettings {
    pub poll_interval: u64,
    pub timeout: u64,
}

impl Default for RecombinationSettings {
    fn default() -> Self {
        let defaults = RecombinationConfig::default();
        Self {
            poll_interval: defaults.poll_interval.as_secs(),
            timeout: defaults.timeout.as_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl ConfigFile {
    /// Base URL of the buckets collection, e.g. `https://host/oss/v2/buckets`
    pub fn buckets_url(&self) -> String {
        format!(
            "{}://{}{}",
            self.service.scheme,
            self.service.host,
            self.service.buckets_path.trim_end_matches('/')
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.service.request_timeout)
    }

    /// Default endpoint table for the configured host and ceilings
    pub fn endpoint_limits(&self) -> EndpointLimitTable {
        EndpointLimitTable::default()
            .with_host(self.service.host.as_str())
            .with_storage_limit(self.limits.storage_per_minute)
            .with_fallback_limit(self.limits.fallback_per_minute)
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            chunking_threshold: self.upload.chunking_threshold,
            chunk_size: self.upload.chunk_size,
        }
    }

    pub fn recombination_config(&self) -> RecombinationConfig {
        RecombinationConfig {
            poll_interval: Duration::from_secs(self.recombination.poll_interval),
            timeout: Duration::from_secs(self.recombination.timeout),
        }
    }

    /// Access token from the environment, falling back to the file
    pub fn access_token(&self) -> Option<String> {
        pick_token(std::env::var(ACCESS_TOKEN_ENV).ok(), self.auth.access_token.as_deref())
    }
}

fn pick_token(env: Option<String>, file: Option<&str>) -> Option<String> {
    env.filter(|t| !t.trim().is_empty())
        .or_else(|| file.filter(|t| !t.trim().is_empty()).map(str::to_string))
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let home = home_dir().ok_or_else(|| Error::Config("Cannot determine home directory".to_string()))?;
    let config_dir = home.join(".config").join(CONFIG_DIR);

    // Create directory if it doesn't exist
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)
            .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
    }

    Ok(config_dir)
}

/// Get the configuration file path
pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(CONFIG_FILE))
}

/// Load configuration from the default location
pub fn load_config() -> Result<ConfigFile> {
    load_config_from(&get_config_path()?)
}

/// Load configuration from `path`
pub fn load_config_from(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Err(Error::ConfigNotFound(path.to_path_buf()));
    }

    let content = fs::read_to_string(path)
        .map_err(|e| Error::InvalidConfig(format!("Failed to read config file: {}", e)))?;

    let config: ConfigFile = toml::from_str(&content)
        .map_err(|e| Error::InvalidConfig(format!("Failed to parse config file: {}", e)))?;

    Ok(config)
}

/// Save configuration to the default location
pub fn save_config(config: &ConfigFile) -> Result<()> {
    save_config_to(config, &get_config_path()?)
}

/// Save configuration to `path`
pub fn save_config_to(config: &ConfigFile, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::InvalidConfig(format!("Failed to serialize config: {}", e)))?;

    fs::write(path, content).map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

    // The file may hold an access token: read/write for owner only
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }

    Ok(())
}

/// Validate configuration
pub fn validate_config(config: &ConfigFile) -> Result<()> {
    let service = &config.service;
    if service.host.trim().is_empty() {
        return Err(Error::InvalidInput("Service host cannot be empty".to_string()));
    }
    if service.scheme != "https" && service.scheme != "http" {
        return Err(Error::InvalidInput(format!(
            "Unsupported scheme '{}' (expected http or https)",
            service.scheme
        )));
    }
    if !service.buckets_path.starts_with('/') {
        return Err(Error::InvalidInput(format!(
            "Buckets path must start with '/', got '{}'",
            service.buckets_path
        )));
    }
    if service.request_timeout == 0 {
        return Err(Error::InvalidInput(
            "Request timeout must be at least 1 second".to_string(),
        ));
    }

    if config.limits.storage_per_minute == 0 || config.limits.fallback_per_minute == 0 {
        return Err(Error::InvalidInput(
            "Rate limits must allow at least one request per minute".to_string(),
        ));
    }

    let upload = &config.upload;
    if upload.chunk_size == 0 {
        return Err(Error::InvalidInput("Chunk size must be greater than 0".to_string()));
    }
    if upload.chunk_size > upload.chunking_threshold {
        return Err(Error::InvalidInput(format!(
            "Chunk size ({}) cannot exceed the chunking threshold ({})",
            upload.chunk_size, upload.chunking_threshold
        )));
    }

    let recombination = &config.recombination;
    if recombination.poll_interval == 0 {
        return Err(Error::InvalidInput("Poll interval must be greater than 0".to_string()));
    }
    if recombination.timeout < recombination.poll_interval {
        return Err(Error::InvalidInput(format!(
            "Recombination timeout ({}s) is shorter than the poll interval ({}s)",
            recombination.timeout, recombination.poll_interval
        )));
    }

    Ok(())
}

/// Check if configuration exists
pub fn config_exists() -> bool {
    get_config_path().map(|p| p.exists()).unwrap_or(false)
}

/// Public alias for ConfigFile (used by lib.rs)
pub use ConfigFile as Config;
