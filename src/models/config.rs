//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Registration site connection settings
    #[serde(default)]
    pub source: SourceConfig,

    /// Crawl scheduling, retry and concurrency settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Catalog persistence settings
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.source.user_agent.trim().is_empty() {
            return Err(AppError::validation("source.user_agent is empty"));
        }
        if self.source.timeout_secs == 0 {
            return Err(AppError::validation("source.timeout_secs must be > 0"));
        }
        if self.crawler.list_concurrency == 0 {
            return Err(AppError::validation("crawler.list_concurrency must be > 0"));
        }
        if self.crawler.detail_concurrency == 0 {
            return Err(AppError::validation(
                "crawler.detail_concurrency must be > 0",
            ));
        }
        if self.crawler.term_concurrency == 0 {
            return Err(AppError::validation("crawler.term_concurrency must be > 0"));
        }
        if self.crawler.max_attempts == 0 {
            return Err(AppError::validation("crawler.max_attempts must be > 0"));
        }
        if self.crawler.backoff_base_ms > self.crawler.backoff_max_ms {
            return Err(AppError::validation(
                "crawler.backoff_base_ms must not exceed crawler.backoff_max_ms",
            ));
        }
        Ok(())
    }

    /// Resolve the storage directory relative to `base` unless it is absolute.
    pub fn storage_dir(&self, base: &Path) -> PathBuf {
        let dir = Path::new(&self.storage.dir);
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            base.join(dir)
        }
    }
}

/// Registration site connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL all page paths are joined onto (must end with `/`)
    #[serde(default)]
    pub base_url: String,

    /// User agent sent with every request
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Per-request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    #[serde(default = "defaults::term_list_path")]
    pub term_list_path: String,

    #[serde(default = "defaults::subject_list_path")]
    pub subject_list_path: String,

    #[serde(default = "defaults::section_list_path")]
    pub section_list_path: String,

    #[serde(default = "defaults::section_detail_path")]
    pub section_detail_path: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            term_list_path: defaults::term_list_path(),
            subject_list_path: defaults::subject_list_path(),
            section_list_path: defaults::section_list_path(),
            section_detail_path: defaults::section_detail_path(),
        }
    }
}

/// Crawl scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Concurrent term/subject/section-list fetches
    #[serde(default = "defaults::list_concurrency")]
    pub list_concurrency: usize,

    /// Concurrent section-detail fetches
    #[serde(default = "defaults::detail_concurrency")]
    pub detail_concurrency: usize,

    /// Terms crawled and reconciled at the same time
    #[serde(default = "defaults::term_concurrency")]
    pub term_concurrency: usize,

    /// Attempts per page before the failure is recorded
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on each further retry
    #[serde(default = "defaults::backoff_base")]
    pub backoff_base_ms: u64,

    /// Upper bound for a single backoff delay
    #[serde(default = "defaults::backoff_max")]
    pub backoff_max_ms: u64,

    /// Politeness delay after every fetch
    #[serde(default)]
    pub request_delay_ms: u64,

    /// Cancel the whole job after this many seconds
    #[serde(default)]
    pub deadline_secs: Option<u64>,

    /// Term codes to crawl; empty means every term on the term list
    #[serde(default)]
    pub terms: Vec<String>,
}

impl CrawlerConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            list_concurrency: defaults::list_concurrency(),
            detail_concurrency: defaults::detail_concurrency(),
            term_concurrency: defaults::term_concurrency(),
            max_attempts: defaults::max_attempts(),
            backoff_base_ms: defaults::backoff_base(),
            backoff_max_ms: defaults::backoff_max(),
            request_delay_ms: 0,
            deadline_secs: None,
            terms: Vec::new(),
        }
    }
}

/// Catalog persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding `catalog.json` and `report.json`
    #[serde(default = "defaults::storage_dir")]
    pub dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: defaults::storage_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    // Source defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; catalog-crawler/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn term_list_path() -> String {
        "bwckschd.p_disp_dyn_sched".into()
    }
    pub fn subject_list_path() -> String {
        "bwckgens.p_proc_term_date".into()
    }
    pub fn section_list_path() -> String {
        "bwckschd.p_get_crse_unsec".into()
    }
    pub fn section_detail_path() -> String {
        "bwckschd.p_disp_detail_sched".into()
    }

    // Crawler defaults
    pub fn list_concurrency() -> usize {
        2
    }
    pub fn detail_concurrency() -> usize {
        4
    }
    pub fn term_concurrency() -> usize {
        1
    }
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn backoff_base() -> u64 {
        500
    }
    pub fn backoff_max() -> u64 {
        8_000
    }

    pub fn storage_dir() -> String {
        "storage".into()
    }
    pub fn log_level() -> String {
        "info".into()
    }
}
