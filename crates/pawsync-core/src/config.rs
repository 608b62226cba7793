//! Configuration management.
//!
//! Configuration is stored at `~/.config/pawsync/config.json`. Missing files
//! and missing fields fall back to defaults; `PAWSYNC_API_URL` and
//! `PAWSYNC_API_TOKEN` override the file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::pagination::DEFAULT_PAGE_SIZE;
use crate::query::retry::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS, DEFAULT_RETRIES};
use crate::query::RetryPolicy;
use crate::status::{
    StatusConfig, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS,
    DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_MIN_INTERVAL_SECS,
};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "pawsync";

const CONFIG_FILE: &str = "config.json";

pub const ENV_API_URL: &str = "PAWSYNC_API_URL";
pub const ENV_API_TOKEN: &str = "PAWSYNC_API_TOKEN";

const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSettings {
    pub min_interval_secs: u64,
    pub max_consecutive_failures: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            min_interval_secs: DEFAULT_MIN_INTERVAL_SECS,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    /// Only ever read from the environment.
    #[serde(skip)]
    pub api_token: Option<String>,
    pub page_size: u32,
    /// Seconds a fetched value is served without revalidating.
    pub stale_time_secs: u64,
    pub request_timeout_secs: u64,
    pub retry: RetrySettings,
    pub status: StatusSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_token: None,
            page_size: DEFAULT_PAGE_SIZE,
            stale_time_secs: 0,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            retry: RetrySettings::default(),
            status: StatusSettings::default(),
        }
    }
}

impl Config {
    /// Load the config file (defaults if absent) and apply env overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file()?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn load_file() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Override fields from environment variables looked up with `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url;
        }
        if let Some(token) = var(ENV_API_TOKEN).filter(|v| !v.trim().is_empty()) {
            self.api_token = Some(token);
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn stale_time(&self) -> Duration {
        Duration::from_secs(self.stale_time_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retry.retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn status_config(&self) -> StatusConfig {
        StatusConfig {
            min_interval: Duration::from_secs(self.status.min_interval_secs),
            max_consecutive_failures: self.status.max_consecutive_failures,
            backoff_base: Duration::from_millis(self.status.backoff_base_ms),
            backoff_max: Duration::from_millis(self.status.backoff_max_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"page_size": 50, "retry": {"retries": 1}}"#).unwrap();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.retry.retries, 1);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.status, StatusSettings::default());
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(|name| match name {
            ENV_API_URL => Some("https://pets.example.com/api".to_string()),
            ENV_API_TOKEN => Some("secret".to_string()),
            _ => None,
        });
        assert_eq!(config.api_base_url, "https://pets.example.com/api");
        assert_eq!(config.api_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_blank_env_is_ignored() {
        let mut config = Config::default();
        config.apply_env(|_| Some("  ".to_string()));
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert!(config.api_token.is_none());
    }

    #[test]
    fn test_token_is_never_written() {
        let config = Config {
            api_token: Some("secret".to_string()),
            ..Config::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_conversions() {
        let config = Config::default();
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.status_config(), StatusConfig::default());
        assert_eq!(config.stale_time(), Duration::ZERO);
    }
}
