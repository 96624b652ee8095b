//! Bot Configuration
//!
//! Loaded from a TOML file (`gonk.toml` by default). Every field has a
//! default, so an empty or missing file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bridge::{HttpSettings, IsGdShortener, ShortenOptions};

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_nick")]
    pub nick: String,
    #[serde(default = "default_modules_dir")]
    pub modules_dir: PathBuf,
    /// Reload modules when their files change
    #[serde(default = "default_true")]
    pub watch: bool,
    #[serde(default)]
    pub shortener: ShortenerConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

fn default_nick() -> String {
    "gonk".to_string()
}

fn default_modules_dir() -> PathBuf {
    PathBuf::from("modules")
}

fn default_true() -> bool {
    true
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            nick: default_nick(),
            modules_dir: default_modules_dir(),
            watch: true,
            shortener: ShortenerConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

/// `[shortener]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortenerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_min_savings")]
    pub min_savings: usize,
    #[serde(default)]
    pub force: bool,
}

fn default_endpoint() -> String {
    IsGdShortener::DEFAULT_ENDPOINT.to_string()
}

fn default_min_savings() -> usize {
    ShortenOptions::default().min_savings
}

impl Default for ShortenerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_endpoint(),
            min_savings: default_min_savings(),
            force: false,
        }
    }
}

/// `[http]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub user_agent: Option<String>,
    /// No timeout when unset
    pub timeout_secs: Option<u64>,
}

impl BotConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Like [`BotConfig::load`], but a missing file yields the defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn shorten_options(&self) -> ShortenOptions {
        ShortenOptions {
            force: self.shortener.force,
            replace: true,
            min_savings: self.shortener.min_savings,
        }
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            user_agent: self.http.user_agent.clone(),
            timeout: self.http.timeout_secs.map(Duration::from_secs),
        }
    }
}
