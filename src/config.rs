//! Configuration management for the log analysis pipeline.
//!
//! Supports loading from environment variables and TOML config files,
//! with environment variables taking precedence for secrets.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Parsing and aggregation settings
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// ipinfo lookup settings
    #[serde(default)]
    pub ipinfo: IpInfoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Maximum non-blank data lines to parse per file
    #[serde(default = "default_max_lines")]
    pub max_lines: u64,

    /// Number of entries for top-path / top-IP rankings
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_lines: default_max_lines(),
            top_n: default_top_n(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpInfoConfig {
    /// API token, loaded from IPINFO_TOKEN when unset
    #[serde(default)]
    pub token: String,

    /// Base URL for the lookup endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Connect/read timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retry attempts beyond the first for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Concurrent lookups fanned out at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Cache bounds
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for IpInfoConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            concurrency: default_concurrency(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum cached addresses
    #[serde(default = "default_cache_max_size")]
    pub max_size: u64,

    /// Entry lifetime in seconds, measured from write
    #[serde(default = "default_cache_ttl_secs")]
    pub expire_after_write_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            expire_after_write_secs: default_cache_ttl_secs(),
        }
    }
}

// Default value functions
fn default_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50 MiB
}

fn default_max_lines() -> u64 {
    1_000_000
}

fn default_top_n() -> usize {
    10
}

fn default_base_url() -> String {
    "https://api.ipinfo.io/lite".to_string()
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_max_retries() -> u32 {
    2
}

fn default_concurrency() -> usize {
    4
}

fn default_cache_max_size() -> u64 {
    10_000
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

impl Config {
    /// Load configuration from environment variables only
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML config file with environment overrides
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&contents)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Environment variables override file settings for secrets and endpoints
    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("IPINFO_TOKEN") {
            self.ipinfo.token = token;
        }
        if let Ok(url) = std::env::var("IPINFO_BASE_URL") {
            self.ipinfo.base_url = url;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.analysis.max_lines == 0 {
            anyhow::bail!("analysis.max_lines must be > 0");
        }
        if self.analysis.top_n == 0 {
            anyhow::bail!("analysis.top_n must be > 0");
        }
        if self.analysis.max_file_size == 0 {
            anyhow::bail!("analysis.max_file_size must be > 0");
        }
        if self.ipinfo.base_url.is_empty() {
            anyhow::bail!("ipinfo.base_url must not be empty");
        }
        if self.ipinfo.concurrency == 0 {
            anyhow::bail!("ipinfo.concurrency must be > 0");
        }
        if self.ipinfo.cache.max_size == 0 {
            anyhow::bail!("ipinfo.cache.max_size must be > 0");
        }
        Ok(())
    }
}
