use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::common::constants::{DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_PAGE_CAP, DEFAULT_QUEUE_CAPACITY};
use crate::common::error::{IngestError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Kai-like services keyed by name (`flo`, `eag`).
    #[serde(default)]
    pub kai: HashMap<String, KaiServiceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogConfig {
    pub seed_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    pub listen_addr: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KaiServiceConfig {
    pub base_url: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Path of the play-history endpoint, relative to `base_url`.
    pub resource: String,
    #[serde(default = "default_page_cap")]
    pub page_cap: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("data/scores.db")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_page_cap() -> u32 {
    DEFAULT_PAGE_CAP
}

fn default_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

impl Config {
    /// Read `path` as TOML, then apply `KAI_<SERVICE>_CLIENT_SECRET` overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        for (service, kai) in self.kai.iter_mut() {
            let var = format!("KAI_{}_CLIENT_SECRET", service.to_uppercase());
            if let Ok(secret) = std::env::var(&var) {
                kai.client_secret = Some(secret);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.queue.capacity == 0 {
            return Err(IngestError::Config("queue.capacity must be at least 1".into()));
        }
        for (service, kai) in &self.kai {
            if reqwest::Url::parse(&kai.base_url).is_err() {
                return Err(IngestError::Config(format!(
                    "kai.{}.base_url is not a valid URL: {}",
                    service, kai.base_url
                )));
            }
            if kai.page_cap == 0 {
                return Err(IngestError::Config(format!("kai.{}.page_cap must be at least 1", service)));
            }
        }
        Ok(())
    }

    pub fn kai_service(&self, service: &str) -> Result<&KaiServiceConfig> {
        self.kai
            .get(service)
            .ok_or_else(|| IngestError::Config(format!("no [kai.{}] section configured", service)))
    }
}
