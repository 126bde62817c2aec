//! Settings, the optional TOML config file, and run options.
//!
//! Precedence, lowest to highest: built-in defaults, `harvest.toml`, the
//! `DATABASE_URL` environment variable (also read from `.env`), CLI flags.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http_client::{HttpClient, HttpError, RetryPolicy, USER_AGENT};
use crate::models::Category;
use crate::repository::DbContext;

pub const DEFAULT_DATABASE_FILENAME: &str = "catalog.db";
pub const CONFIG_FILENAME: &str = "harvest.toml";
pub const DEFAULT_BASE_URL: &str = "https://m.dsq4d.com";

/// Errors while loading the config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid delay of {secs} seconds: {source}")]
    Delay {
        secs: f64,
        #[source]
        source: std::time::TryFromFloatSecsError,
    },
}

/// Per-request pause from a seconds value; negative values mean no pause.
pub fn delay_from_secs(secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs.max(0.0)).map_err(|source| ConfigError::Delay { secs, source })
}

/// Resolved application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename inside `data_dir`.
    pub database_filename: String,
    /// Database URL (overrides data_dir/database_filename if set).
    pub database_url: Option<String>,
    /// Root of the remote catalog.
    pub base_url: String,
    pub user_agent: String,
    /// Listing, detail and play page timeout in seconds.
    pub page_timeout: u64,
    /// Broker endpoint timeout in seconds.
    pub broker_timeout: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("catalog-harvest");

        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: USER_AGENT.to_string(),
            page_timeout: 5,
            broker_timeout: 3,
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        match &self.database_url {
            Some(url) => url.clone(),
            None => format!("sqlite:{}", self.database_path().display()),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Whether the store exists. An explicit database URL is assumed to.
    pub fn database_exists(&self) -> bool {
        self.database_url.is_some() || self.database_path().exists()
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)
    }

    pub fn create_db_context(&self) -> DbContext {
        DbContext::from_url(&self.database_url())
    }

    /// Parsed catalog root every site URL is joined onto.
    pub fn site_url(&self) -> Result<url::Url, url::ParseError> {
        crate::harvest::site_root(&self.base_url)
    }

    /// Build the HTTP client for the configured source.
    pub fn http_client(&self, retry: RetryPolicy) -> Result<HttpClient, HttpError> {
        HttpClient::builder()
            .user_agent(&self.user_agent)
            .referer(format!("{}/", self.base_url.trim_end_matches('/')))
            .page_timeout(Duration::from_secs(self.page_timeout))
            .broker_timeout(Duration::from_secs(self.broker_timeout))
            .retry_policy(retry)
            .build()
    }
}

/// Retry section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub retryable_statuses: Option<Vec<u16>>,
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            backoff_base: self
                .backoff_base_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_base),
            max_backoff: self
                .max_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
            retryable_statuses: self
                .retryable_statuses
                .clone()
                .unwrap_or(defaults.retryable_statuses),
        }
    }
}

/// Category entry of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryEntry {
    pub id: u32,
    pub label: String,
}

/// Contents of `harvest.toml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: Option<String>,
    pub user_agent: Option<String>,
    pub database_url: Option<String>,
    pub page_timeout_secs: Option<u64>,
    pub broker_timeout_secs: Option<u64>,
    pub delay_secs: Option<f64>,
    pub workers: Option<usize>,
    pub batch_size: Option<usize>,
    pub retry: RetryConfig,
    /// Replaces the built-in category table when non-empty.
    pub categories: Vec<CategoryEntry>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn apply_to_settings(&self, settings: &mut Settings) {
        if let Some(url) = &self.base_url {
            settings.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(ua) = &self.user_agent {
            settings.user_agent = ua.clone();
        }
        if let Some(url) = &self.database_url {
            settings.database_url = Some(url.clone());
        }
        if let Some(secs) = self.page_timeout_secs {
            settings.page_timeout = secs;
        }
        if let Some(secs) = self.broker_timeout_secs {
            settings.broker_timeout = secs;
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.to_policy()
    }

    pub fn categories(&self) -> Vec<Category> {
        if self.categories.is_empty() {
            return Category::defaults();
        }
        self.categories
            .iter()
            .map(|c| Category::new(c.id, c.label.clone()))
            .collect()
    }

    /// Run options with the config file's overrides applied.
    pub fn harvest_options(&self) -> Result<HarvestOptions, ConfigError> {
        let mut options = HarvestOptions::default();
        if let Some(secs) = self.delay_secs {
            options.delay = delay_from_secs(secs)?;
        }
        if let Some(workers) = self.workers {
            options.workers = workers.max(1);
        }
        if let Some(batch_size) = self.batch_size {
            options.batch_size = batch_size.max(1);
        }
        Ok(options)
    }
}

/// Knobs of a harvesting run.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestOptions {
    /// Base pacing delay applied per worker after each task (zero disables).
    pub delay: Duration,
    /// Maximum in-flight detail and episode tasks.
    pub workers: usize,
    /// Work-count flush threshold; the episode threshold is five times this.
    pub batch_size: usize,
    /// Limit every category to `test_page_limit` pages.
    pub test_mode: bool,
    pub test_page_limit: u32,
    /// Listing pages per wave; also the checkpoint granularity.
    pub pages_per_wave: u32,
    /// Maximum concurrent listing page fetches.
    pub listing_concurrency: usize,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(100),
            workers: 8,
            batch_size: 50,
            test_mode: false,
            test_page_limit: 2,
            pages_per_wave: 3,
            listing_concurrency: 5,
        }
    }
}

impl HarvestOptions {
    pub fn episode_threshold(&self) -> usize {
        self.batch_size.saturating_mul(5)
    }

    /// Pause between two categories of a full run.
    pub fn category_pause(&self) -> Duration {
        self.delay * 2
    }
}

/// Where to load settings from.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub data_dir: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

/// Resolve settings and config file.
///
/// Without an explicit path, `harvest.toml` is looked up in the data
/// directory and then in the current directory; a missing file is fine.
pub fn load_settings_with_options(options: LoadOptions) -> Result<(Settings, Config), ConfigError> {
    let mut settings = options
        .data_dir
        .map(Settings::with_data_dir)
        .unwrap_or_default();

    let config_path = options.config_path.or_else(|| {
        [settings.data_dir.join(CONFIG_FILENAME), PathBuf::from(CONFIG_FILENAME)]
            .into_iter()
            .find(|p| p.is_file())
    });

    let config = match config_path {
        Some(path) => {
            tracing::debug!("Loading config from {}", path.display());
            Config::load(&path)?
        }
        None => Config::default(),
    };

    config.apply_to_settings(&mut settings);

    if let Ok(url) = std::env::var("DATABASE_URL") {
        if !url.is_empty() {
            settings.database_url = Some(url);
        }
    }

    Ok((settings, config))
}
