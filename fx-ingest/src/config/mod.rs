//! Application configuration.
//!
//! Configuration comes from an optional TOML file with every section defaulted,
//! then selected values are overridden from the environment:
//!
//! | Variable                 | Field                   |
//! |--------------------------|-------------------------|
//! | `FX_INGEST_DATABASE_URL` | `storage.database_url`  |
//! | `FX_INGEST_LOG_DIR`      | `logging.log_dir`       |
//! | `FX_INGEST_LOG_FILTER`   | `logging.filter`        |
//! | `FX_INGEST_ACCESS_TOKEN` | `source.access_token`   |

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::CacheConfig;
use crate::crawler::CrawlerConfig;
use crate::scheduler::SchedulerConfig;
use crate::source::SourceConfig;
use crate::worker::WorkerPoolConfig;
use crate::{Error, Result};

pub const ENV_DATABASE_URL: &str = "FX_INGEST_DATABASE_URL";
pub const ENV_LOG_DIR: &str = "FX_INGEST_LOG_DIR";
pub const ENV_LOG_FILTER: &str = "FX_INGEST_LOG_FILTER";
pub const ENV_ACCESS_TOKEN: &str = "FX_INGEST_ACCESS_TOKEN";

/// Storage backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `sqlite:` URL, or `memory` for the in-process store.
    pub database_url: String,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:fx-ingest.db?mode=rwc".to_string(),
            max_connections: 4,
        }
    }
}

impl StorageConfig {
    pub fn is_memory(&self) -> bool {
        self.database_url == "memory"
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub log_dir: String,
    /// `EnvFilter` directive. Falls back to `RUST_LOG`, then the built-in default.
    pub filter: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            filter: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub worker_pool: WorkerPoolConfig,
    pub storage: StorageConfig,
    pub source: SourceConfig,
    pub crawler: CrawlerConfig,
    pub cache: CacheConfig,
    pub logging: LoggingSettings,
}

impl AppConfig {
    /// Load from `path` (if any) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::config(format!("cannot read config file {}: {e}", path.display()))
                })?;
                Self::from_toml_str(&content)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(format!("invalid config: {e}")))
    }

    /// Apply overrides from `lookup`, normally the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = non_empty(ENV_DATABASE_URL) {
            debug!(key = ENV_DATABASE_URL, "Overriding database_url from environment");
            self.storage.database_url = url;
        }
        if let Some(dir) = non_empty(ENV_LOG_DIR) {
            self.logging.log_dir = dir;
        }
        if let Some(filter) = non_empty(ENV_LOG_FILTER) {
            self.logging.filter = Some(filter);
        }
        if let Some(token) = non_empty(ENV_ACCESS_TOKEN) {
            self.source.access_token = Some(token);
        }
    }

    /// Check the sections that will actually be used.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.enabled {
            self.crawler.validate()?;
            self.source.validate()?;
        }
        self.cache.validate()?;
        if self.storage.database_url.trim().is_empty() {
            return Err(Error::config("storage database_url is empty"));
        }
        Ok(())
    }
}
