use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";
pub const DEFAULT_BATCH_SIZE: usize = 4;
pub const DEFAULT_BATCH_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Configuration {
    pub tmdb: Option<TmdbConfig>,
    pub sync: Option<SyncConfig>,
    pub storage: Option<StorageConfig>,
    pub reminders: Option<ReminderConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TmdbConfig {
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
    #[serde(rename = "baseUrl")]
    pub base_url: Option<String>,
    pub language: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    #[serde(rename = "batchSize")]
    pub batch_size: Option<usize>,
    #[serde(rename = "batchDelayMs")]
    pub batch_delay_ms: Option<u64>,
    #[serde(rename = "unitTimeoutSeconds")]
    pub unit_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReminderConfig {
    #[serde(rename = "releaseHour")]
    pub release_hour: Option<u32>,
}

impl Configuration {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Configuration = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Missing config files are not an error; every section has defaults.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        Url::parse(&self.tmdb_base_url())
            .map_err(|e| anyhow::anyhow!("Invalid TMDB base URL '{}': {}", self.tmdb_base_url(), e))?;
        if self.batch_size() == 0 {
            anyhow::bail!("sync.batchSize must be at least 1");
        }
        if self.release_hour() > 23 {
            anyhow::bail!("reminders.releaseHour must be between 0 and 23");
        }
        Ok(())
    }

    pub fn tmdb_api_key(&self) -> Option<&str> {
        self.tmdb
            .as_ref()
            .and_then(|t| t.api_key.as_deref())
            .filter(|key| !key.is_empty())
    }

    pub fn tmdb_base_url(&self) -> String {
        self.tmdb
            .as_ref()
            .and_then(|t| t.base_url.clone())
            .unwrap_or_else(|| DEFAULT_TMDB_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn tmdb_language(&self) -> String {
        self.tmdb
            .as_ref()
            .and_then(|t| t.language.clone())
            .unwrap_or_else(|| "en-US".to_string())
    }

    pub fn tmdb_region(&self) -> String {
        self.tmdb
            .as_ref()
            .and_then(|t| t.region.clone())
            .unwrap_or_else(|| "US".to_string())
    }

    pub fn batch_size(&self) -> usize {
        self.sync
            .as_ref()
            .and_then(|s| s.batch_size)
            .unwrap_or(DEFAULT_BATCH_SIZE)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(
            self.sync
                .as_ref()
                .and_then(|s| s.batch_delay_ms)
                .unwrap_or(DEFAULT_BATCH_DELAY_MS),
        )
    }

    pub fn unit_timeout(&self) -> Duration {
        Duration::from_secs(
            self.sync
                .as_ref()
                .and_then(|s| s.unit_timeout_seconds)
                .unwrap_or(20),
        )
    }

    pub fn state_path(&self) -> PathBuf {
        self.storage
            .as_ref()
            .map(|s| PathBuf::from(&s.path))
            .unwrap_or_else(|| PathBuf::from("calendarr-state.json"))
    }

    pub fn release_hour(&self) -> u32 {
        self.reminders
            .as_ref()
            .and_then(|r| r.release_hour)
            .unwrap_or(0)
    }
}
