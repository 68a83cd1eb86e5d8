//! Application configuration.
//!
//! Configuration is a TOML file under the platform config directory,
//! created with defaults on first run. Every field has a default so a
//! partial file stays valid across upgrades.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::models::{Indexer, IndexerId, IndexerKind};
use crate::app::retry::RetryPolicy;
use crate::constants::{indexers, queue, search, workers};
use crate::errors::{ConfigError, ConfigResult};

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory downloaded files are written to
    pub download_dir: PathBuf,

    /// Number of concurrent download workers
    pub max_concurrent_downloads: usize,

    /// Maximum live items in the download queue
    pub max_queue_size: usize,

    /// TTL for cached search responses
    #[serde(with = "humantime_serde")]
    pub search_cache_ttl: Duration,

    /// Ceiling timeout for a whole search cycle
    #[serde(with = "humantime_serde")]
    pub search_ceiling_timeout: Duration,

    /// Retry behavior for failed downloads
    pub retry: RetryPolicy,

    /// Configured indexers
    #[serde(rename = "indexer")]
    pub indexers: Vec<IndexerConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_concurrent_downloads: workers::DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            max_queue_size: queue::MAX_QUEUE_SIZE,
            search_cache_ttl: search::CACHE_TTL,
            search_ceiling_timeout: search::CEILING_TIMEOUT,
            retry: RetryPolicy::default(),
            indexers: Vec::new(),
        }
    }
}

/// One indexer as declared in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub id: u32,
    pub name: String,
    pub base_url: String,
    pub kind: IndexerKind,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_indexer_priority")]
    pub priority: u8,
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
    #[serde(default = "default_indexer_timeout_secs")]
    pub timeout_seconds: u64,
}

impl From<&IndexerConfig> for Indexer {
    fn from(config: &IndexerConfig) -> Self {
        Indexer {
            id: IndexerId(config.id),
            name: config.name.clone(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            kind: config.kind,
            is_active: config.active,
            priority: config.priority,
            rate_limit_requests: config.rate_limit_requests,
            rate_limit_window_secs: config.rate_limit_window_secs,
            timeout_seconds: config.timeout_seconds,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_indexer_priority() -> u8 {
    5
}

fn default_rate_limit_requests() -> u32 {
    indexers::DEFAULT_RATE_LIMIT_REQUESTS
}

fn default_rate_limit_window_secs() -> u64 {
    indexers::DEFAULT_RATE_LIMIT_WINDOW_SECS
}

fn default_indexer_timeout_secs() -> u64 {
    indexers::DEFAULT_TIMEOUT_SECS
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("foliofox")
}

impl AppConfig {
    /// Platform path of the config file
    pub fn default_path() -> ConfigResult<PathBuf> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(dir.join("foliofox").join("config.toml"))
    }

    /// Load the config file, writing a default one on first run
    pub fn load_or_create(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let config: AppConfig = toml::from_str(&raw)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = AppConfig::default();
            config.save(path)?;
            info!("Wrote default configuration to {}", path.display());
            Ok(config)
        }
    }

    /// Write the config to disk, creating parent directories
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Reject configurations the scheduler cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent_downloads == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrent_downloads".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_queue_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_queue_size".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        for indexer in &self.indexers {
            if indexer.rate_limit_requests == 0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("indexer \"{}\".rate_limit_requests", indexer.name),
                    reason: "must be at least 1".to_string(),
                });
            }
            if url::Url::parse(&indexer.base_url).is_err() {
                return Err(ConfigError::InvalidValue {
                    field: format!("indexer \"{}\".base_url", indexer.name),
                    reason: "not a valid URL".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        // First call writes the default file
        let created = AppConfig::load_or_create(&path).unwrap();
        assert!(path.exists());

        let loaded = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(
            created.max_concurrent_downloads,
            loaded.max_concurrent_downloads
        );
        assert_eq!(created.search_cache_ttl, loaded.search_cache_ttl);
    }

    #[test]
    fn test_partial_file_gets_defaults() {
        let raw = r#"
            max_concurrent_downloads = 5

            [[indexer]]
            id = 1
            name = "main"
            base_url = "https://prowlarr.example.com"
            kind = "prowlarr"
            api_key = "secret"
        "#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        config.validate().unwrap();

        assert_eq!(config.max_concurrent_downloads, 5);
        assert_eq!(config.max_queue_size, queue::MAX_QUEUE_SIZE);
        assert_eq!(config.indexers.len(), 1);
        assert_eq!(
            config.indexers[0].rate_limit_requests,
            indexers::DEFAULT_RATE_LIMIT_REQUESTS
        );

        let indexer = Indexer::from(&config.indexers[0]);
        assert_eq!(indexer.id, IndexerId(1));
        assert!(indexer.is_active);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = AppConfig::default();
        config.max_concurrent_downloads = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
