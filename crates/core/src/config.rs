//! Process configuration, read once at startup and passed into constructors.

use std::path::PathBuf;
use std::time::Duration;

use crate::sync::SyncWorkerConfig;
use crate::{Error, Result};

pub const ENV_REMOTE_URL: &str = "GATEKEEPER_REMOTE_URL";
pub const ENV_REMOTE_KEY: &str = "GATEKEEPER_REMOTE_KEY";
pub const ENV_DATA_DIR: &str = "GATEKEEPER_DATA_DIR";
pub const ENV_SYNC_BASE_INTERVAL_SECS: &str = "GATEKEEPER_SYNC_BASE_INTERVAL_SECS";
pub const ENV_SYNC_MAX_INTERVAL_SECS: &str = "GATEKEEPER_SYNC_MAX_INTERVAL_SECS";
pub const ENV_SYNC_BATCH_SIZE: &str = "GATEKEEPER_SYNC_BATCH_SIZE";
pub const ENV_SYNC_MAX_RETRIES: &str = "GATEKEEPER_SYNC_MAX_RETRIES";

const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Empty when the remote store is not configured (offline mode).
    pub remote_url: String,
    pub remote_key: String,
    pub data_dir: PathBuf,
    pub sync: SyncWorkerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            remote_url: String::new(),
            remote_key: String::new(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            sync: SyncWorkerConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();
        if let Some(url) = text(ENV_REMOTE_URL) {
            config.remote_url = url;
        }
        if let Some(key) = text(ENV_REMOTE_KEY) {
            config.remote_key = key;
        }
        if let Some(dir) = text(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = parse_number::<u64>(&text, ENV_SYNC_BASE_INTERVAL_SECS)? {
            config.sync.base_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_number::<u64>(&text, ENV_SYNC_MAX_INTERVAL_SECS)? {
            config.sync.max_interval = Duration::from_secs(secs);
        }
        if let Some(size) = parse_number::<i64>(&text, ENV_SYNC_BATCH_SIZE)? {
            config.sync.batch_size = size;
        }
        if let Some(retries) = parse_number::<u32>(&text, ENV_SYNC_MAX_RETRIES)? {
            config.sync.max_retries = retries;
        }

        if config.sync.base_interval.is_zero() {
            return Err(Error::Config(format!(
                "{} must be greater than zero",
                ENV_SYNC_BASE_INTERVAL_SECS
            )));
        }
        if config.sync.batch_size <= 0 || config.sync.max_retries == 0 {
            return Err(Error::Config(format!(
                "{} and {} must be positive",
                ENV_SYNC_BATCH_SIZE, ENV_SYNC_MAX_RETRIES
            )));
        }
        Ok(config)
    }

    /// Both URL and key are required for the remote store to be used.
    pub fn has_remote(&self) -> bool {
        !self.remote_url.is_empty() && !self.remote_key.is_empty()
    }
}

fn parse_number<T: std::str::FromStr>(
    text: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    text(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| Error::Config(format!("{} is not a valid number: '{}'", key, raw)))
        })
        .transpose()
}
