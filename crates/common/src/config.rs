//! Client configuration types and loading
//!
//! Config precedence: env vars > config file > defaults. The config file
//! itself is located via CLI arg > CONFIG_PATH env var > default filename.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    pub api: ApiConfig,
    pub storage: StorageConfig,
}

/// Backend connection settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    /// Request timeout applied to every backend call, including the
    /// refresh exchange. A timed-out exchange counts as a renewal failure.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Credential persistence settings
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

fn default_timeout() -> u64 {
    30
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// - `SESSION_API_URL` replaces `api.base_url`
    /// - `SESSION_STORE_PATH` replaces `storage.path`
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: ClientConfig = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("SESSION_API_URL") {
            config.api.base_url = url;
        }
        if let Ok(store) = std::env::var("SESSION_STORE_PATH") {
            config.storage.path = PathBuf::from(store);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return Err(Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        if self.api.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be greater than 0".into()));
        }

        if self.storage.path.as_os_str().is_empty() {
            return Err(Error::Config("storage.path must not be empty".into()));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("session-client.toml")
    }
}
