use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Directory holding filings.json and transactions.json
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Failed extraction attempts before a filing is terminally failed
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Parsed rows required for a document to count as extracted
    #[serde(default = "default_min_rows")]
    pub extraction_min_rows_for_success: usize,
    /// Pending filings processed per run, oldest first (None = all)
    #[serde(default = "default_max_filings_per_run")]
    pub max_filings_per_run: Option<usize>,
    /// Skip the index scrape when the last one is younger than this
    #[serde(default = "default_min_scrape_interval_hours")]
    pub min_scrape_interval_hours: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: default_max_retry_attempts(),
            extraction_min_rows_for_success: default_min_rows(),
            max_filings_per_run: default_max_filings_per_run(),
            min_scrape_interval_hours: default_min_scrape_interval_hours(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_max_filings_per_run() -> Option<usize> {
    Some(5)
}

fn default_min_rows() -> usize {
    1
}

fn default_min_scrape_interval_hours() -> u64 {
    12
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Hard timeout per attempt
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Attempts per network call, including the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    4_000
}

fn default_backoff_max_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScraperConfig {
    #[serde(default = "default_scraper_base_url")]
    pub base_url: String,
    /// Filing type substring kept from the index (periodic transaction reports)
    #[serde(default = "default_filing_type")]
    pub filing_type: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_scraper_base_url(),
            filing_type: default_filing_type(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_scraper_base_url() -> String {
    "https://disclosures-clerk.house.gov".to_string()
}

fn default_filing_type() -> String {
    "PTR".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    #[serde(default = "default_notifier_base_url")]
    pub base_url: String,
    /// Bark device key; notifications are not delivered without one
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    /// POST JSON (default) or GET with the message in the path
    #[serde(default = "default_use_post")]
    pub use_post: bool,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            base_url: default_notifier_base_url(),
            api_key: None,
            icon: None,
            use_post: default_use_post(),
        }
    }
}

fn default_notifier_base_url() -> String {
    "https://api.day.app".to_string()
}

fn default_use_post() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Flat environment variables kept for existing deployments
const LEGACY_ENV: &[(&str, &str)] = &[
    ("DATA_DIR", "data_dir"),
    ("MAX_RETRY_ATTEMPTS", "pipeline.max_retry_attempts"),
    (
        "EXTRACTION_MIN_ROWS_FOR_SUCCESS",
        "pipeline.extraction_min_rows_for_success",
    ),
    ("MAX_FILES_PER_RUN", "pipeline.max_filings_per_run"),
    ("NETWORK_TIMEOUT_SECONDS", "network.timeout_seconds"),
    ("NETWORK_MAX_RETRIES", "network.max_retries"),
    ("BARK_API_KEY", "notifier.api_key"),
    ("BARK_BASE_URL", "notifier.base_url"),
    ("NOTIFICATION_ICON", "notifier.icon"),
];

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            pipeline: PipelineConfig::default(),
            network: NetworkConfig::default(),
            scraper: ScraperConfig::default(),
            notifier: NotifierConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let mut builder = Config::builder()
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("DISCLOSURE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (DISCLOSURE_PIPELINE__MAX_RETRY_ATTEMPTS, etc.)
            .add_source(
                Environment::with_prefix("DISCLOSURE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        for (var, key) in LEGACY_ENV {
            builder = builder.set_override_option(*key, std::env::var(var).ok())?;
        }

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.pipeline.max_retry_attempts == 0 {
            errors.push("pipeline.max_retry_attempts must be at least 1".to_string());
        }
        if self.pipeline.max_filings_per_run == Some(0) {
            errors.push("pipeline.max_filings_per_run must be positive when set".to_string());
        }
        if self.network.timeout_seconds == 0 {
            errors.push("network.timeout_seconds must be positive".to_string());
        }
        if self.network.max_retries == 0 {
            errors.push("network.max_retries must be at least 1".to_string());
        }
        if self.network.backoff_max_ms < self.network.backoff_base_ms {
            errors.push(format!(
                "network.backoff_max_ms ({}) is below backoff_base_ms ({})",
                self.network.backoff_max_ms, self.network.backoff_base_ms
            ));
        }
        if !self.scraper.base_url.starts_with("http") {
            errors.push(format!("scraper.base_url is not a URL: {}", self.scraper.base_url));
        }
        if !self.notifier.base_url.starts_with("http") {
            errors.push(format!("notifier.base_url is not a URL: {}", self.notifier.base_url));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.extraction_min_rows_for_success, 1);
        assert_eq!(config.pipeline.max_retry_attempts, 3);
        assert_eq!(config.pipeline.max_filings_per_run, Some(5));
        assert_eq!(config.network.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let mut config = MonitorConfig::default();
        config.pipeline.max_retry_attempts = 0;
        config.network.max_retries = 0;
        config.network.backoff_max_ms = 1;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            "data_dir = \"/tmp/disclosures\"\n\n[pipeline]\nmax_retry_attempts = 5\n\n[notifier]\nuse_post = false\n",
        )
        .unwrap();

        let config = MonitorConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.pipeline.max_retry_attempts, 5);
        assert_eq!(config.pipeline.max_filings_per_run, Some(5));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/disclosures"));
        assert!(!config.notifier.use_post);
        assert_eq!(config.network.max_retries, 3);
    }
}
