use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Scraper configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connection-level retries inside a single fetch. Status errors are
    /// never retried here; the job queue handles those on the next cycle.
    #[serde(default)]
    pub max_retries: usize,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Upper bound on fetches in flight during one scrape batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// Cron expressions (sec min hour dom mon dow, UTC) for the scheduled jobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_assign_cron")]
    pub assign: String,

    #[serde(default = "default_clear_cron")]
    pub clear: String,

    #[serde(default = "default_drain_cron")]
    pub drain: String,

    #[serde(default = "default_report_cron")]
    pub report: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    #[serde(default = "default_low_stock_threshold")]
    pub low_stock_threshold: i64,

    #[serde(default = "default_subject")]
    pub subject: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub recipients: Vec<String>,

    /// When set, digests are POSTed here as JSON instead of only being logged.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_lookup_ttl_secs")]
    pub lookup_ttl_secs: u64,

    #[serde(default = "default_targets_ttl_secs")]
    pub targets_ttl_secs: u64,

    #[serde(default)]
    pub max_entries: Option<usize>,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://www.bellemaison.jp/shop/commodity/0000/".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_retry_delay_ms() -> u64 {
    500
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/98.0.4758.102 Safari/537.36".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/pricewatch.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_concurrency() -> usize {
    8
}
fn default_assign_cron() -> String {
    "0 0 0 * * *".to_string()
}
fn default_clear_cron() -> String {
    "0 59 23 * * *".to_string()
}
fn default_drain_cron() -> String {
    "0 30 * * * *".to_string()
}
fn default_report_cron() -> String {
    "0 0 4 * * *".to_string()
}
fn default_low_stock_threshold() -> i64 {
    9
}
fn default_subject() -> String {
    "Price Tracker daily report".to_string()
}
fn default_lookup_ttl_secs() -> u64 {
    3600
}
fn default_targets_ttl_secs() -> u64 {
    24 * 3600
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: 0,
            retry_delay_ms: default_retry_delay_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            assign: default_assign_cron(),
            clear: default_clear_cron(),
            drain: default_drain_cron(),
            report: default_report_cron(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            low_stock_threshold: default_low_stock_threshold(),
            subject: default_subject(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            lookup_ttl_secs: default_lookup_ttl_secs(),
            targets_ttl_secs: default_targets_ttl_secs(),
            max_entries: None,
        }
    }
}

impl CacheConfig {
    pub fn lookup_ttl(&self) -> Duration {
        Duration::from_secs(self.lookup_ttl_secs)
    }

    pub fn targets_ttl(&self) -> Duration {
        Duration::from_secs(self.targets_ttl_secs)
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::Environment::with_prefix("PRICEWATCH")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("notify.recipients")
                    .try_parsing(true),
            )
            .build()?;

        cfg.try_deserialize().context("Invalid configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_yields_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.scraper.timeout_secs, 60);
        assert_eq!(cfg.report.low_stock_threshold, 9);
        assert_eq!(cfg.pipeline.concurrency, 8);
        assert!(cfg.notify.webhook_url.is_none());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[report]\nlow_stock_threshold = 3\n[pipeline]\nconcurrency = 2\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.report.low_stock_threshold, 3);
        assert_eq!(cfg.report.subject, "Price Tracker daily report");
        assert_eq!(cfg.pipeline.concurrency, 2);
        assert_eq!(cfg.schedule.drain, "0 30 * * * *");
    }
}
