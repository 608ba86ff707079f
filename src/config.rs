//! Client configuration
//!
//! Stored as JSON in `<config dir>/webdrive/config.json`. A missing or
//! unreadable file yields the defaults; `WEBDRIVE_*` environment variables
//! override whatever was loaded.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::navigator::DEFAULT_ROOT_LABEL;

pub const ENV_SERVER_URL: &str = "WEBDRIVE_SERVER_URL";
pub const ENV_DATA_DIR: &str = "WEBDRIVE_DATA_DIR";
pub const ENV_DOWNLOAD_DIR: &str = "WEBDRIVE_DOWNLOAD_DIR";

const DEFAULT_SERVER_URL: &str = "http://localhost:8080";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const MAX_CONNECT_TIMEOUT_SECS: u64 = 300;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid server URL '{0}': must be an absolute http(s) URL")]
    InvalidServerUrl(String),

    #[error("Invalid connect timeout {0}s: must be between 1 and 300 seconds")]
    InvalidTimeout(u64),

    #[error("Root label must not be empty")]
    EmptyRootLabel,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the storage service
    pub server_url: String,
    /// Where the persisted session lives
    pub data_dir: PathBuf,
    /// Default destination for downloads
    pub download_dir: PathBuf,
    pub connect_timeout_secs: u64,
    /// Display label of the root breadcrumb
    pub root_label: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            data_dir: default_data_dir(),
            download_dir: dirs::download_dir()
                .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            root_label: DEFAULT_ROOT_LABEL.to_string(),
        }
    }
}

/// Default location of the config file.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("webdrive")
        .join("config.json")
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("webdrive")
}

impl ClientConfig {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Self {
        let mut config = Self::load_from(&default_config_path());
        config.apply_env_overrides();
        config
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!("Failed to parse client config {:?}: {}", path, e),
                },
                Err(e) => tracing::warn!("Failed to read client config {:?}: {}", path, e),
            }
        }
        Self::default()
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::info!("Client config saved to {:?}", path);
        Ok(())
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&default_config_path())
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`; empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = get(ENV_SERVER_URL) {
            tracing::info!("Overriding server_url from environment: {}", url);
            self.server_url = url;
        }
        if let Some(dir) = get(ENV_DATA_DIR) {
            tracing::info!("Overriding data_dir from environment: {}", dir);
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get(ENV_DOWNLOAD_DIR) {
            tracing::info!("Overriding download_dir from environment: {}", dir);
            self.download_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server_url()?;
        if self.connect_timeout_secs == 0 || self.connect_timeout_secs > MAX_CONNECT_TIMEOUT_SECS {
            return Err(ConfigError::InvalidTimeout(self.connect_timeout_secs));
        }
        if self.root_label.trim().is_empty() {
            return Err(ConfigError::EmptyRootLabel);
        }
        Ok(())
    }

    pub fn server_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(self.server_url.trim())
            .map_err(|_| ConfigError::InvalidServerUrl(self.server_url.clone()))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ConfigError::InvalidServerUrl(self.server_url.clone()));
        }
        Ok(url)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
