//! Immutable runtime configuration.
//!
//! Built once at startup (from a TOML file or defaults) and injected into
//! services by `Arc`. There is deliberately no hot-reload and no process-wide
//! singleton: the only shared mutable state in the system is the scrape
//! batch registry and the database handle.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("parsing config at {}", path.display()))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "./canvass.db".to_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Unit price of one fresh evaluation.
    #[serde(default = "default_price_per_evaluation")]
    pub price_per_evaluation: f64,
    #[serde(default = "default_signup_bonus_amount")]
    pub signup_bonus_amount: f64,
    #[serde(default = "default_signup_bonus_expiry_days")]
    pub signup_bonus_expiry_days: i64,
    /// Global cap on signup-bonus grants across all users. Once reached,
    /// new signups verify and activate without a grant.
    #[serde(default = "default_max_signup_bonuses")]
    pub max_signup_bonuses: i64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            price_per_evaluation: default_price_per_evaluation(),
            signup_bonus_amount: default_signup_bonus_amount(),
            signup_bonus_expiry_days: default_signup_bonus_expiry_days(),
            max_signup_bonuses: default_max_signup_bonuses(),
        }
    }
}

fn default_price_per_evaluation() -> f64 {
    0.01
}

fn default_signup_bonus_amount() -> f64 {
    0.5
}

fn default_signup_bonus_expiry_days() -> i64 {
    90
}

fn default_max_signup_bonuses() -> i64 {
    100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// A claim older than this is considered orphaned and is reset to
    /// pending by the next poll.
    #[serde(default = "default_evaluation_timeout_hours")]
    pub evaluation_timeout_hours: i64,
    /// Linear wait model: one pending item adds this many seconds.
    #[serde(default = "default_wait_seconds_per_item")]
    pub wait_seconds_per_item: i64,
    /// Fixed estimate shown for items a worker has already claimed.
    #[serde(default = "default_in_progress_wait")]
    pub in_progress_wait: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            evaluation_timeout_hours: default_evaluation_timeout_hours(),
            wait_seconds_per_item: default_wait_seconds_per_item(),
            in_progress_wait: default_in_progress_wait(),
        }
    }
}

fn default_evaluation_timeout_hours() -> i64 {
    2
}

fn default_wait_seconds_per_item() -> i64 {
    90
}

fn default_in_progress_wait() -> String {
    "a few minutes".to_owned()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Cosine similarity at or above which an incoming prompt reuses an
    /// existing one instead of inserting a duplicate.
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f32,
    #[serde(default = "default_max_prompts")]
    pub max_prompts: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            duplicate_threshold: default_duplicate_threshold(),
            max_prompts: default_max_prompts(),
        }
    }
}

fn default_duplicate_threshold() -> f32 {
    0.995
}

fn default_max_prompts() -> usize {
    100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Bearer token for the scraper API. Empty disables triggering.
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub dataset_id: String,
    #[serde(default = "default_scraper_base_url")]
    pub base_url: String,
    #[serde(default = "default_country")]
    pub default_country: String,
    /// Public base URL the provider posts webhooks back to.
    #[serde(default)]
    pub webhook_base_url: String,
    /// Shared secret carried in the webhook Basic-auth header.
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default = "default_batch_ttl_hours")]
    pub batch_ttl_hours: i64,
    #[serde(default = "default_scraper_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            dataset_id: String::new(),
            base_url: default_scraper_base_url(),
            default_country: default_country(),
            webhook_base_url: String::new(),
            webhook_secret: String::new(),
            batch_ttl_hours: default_batch_ttl_hours(),
            timeout_secs: default_scraper_timeout_secs(),
        }
    }
}

fn default_scraper_base_url() -> String {
    "https://api.brightdata.com/datasets/v3/trigger".to_owned()
}

fn default_country() -> String {
    "US".to_owned()
}

fn default_batch_ttl_hours() -> i64 {
    24
}

fn default_scraper_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert!(config.billing.price_per_evaluation > 0.0);
        assert_eq!(config.queue.evaluation_timeout_hours, 2);
        assert!(config.ingest.duplicate_threshold > 0.99);
        assert_eq!(config.scraper.default_country, "US");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            "
            [billing]
            price_per_evaluation = 0.02

            [queue]
            evaluation_timeout_hours = 4
            ",
        )
        .unwrap();

        assert_eq!(config.billing.price_per_evaluation, 0.02);
        assert_eq!(config.billing.max_signup_bonuses, 100);
        assert_eq!(config.queue.evaluation_timeout_hours, 4);
        assert_eq!(config.ingest.max_prompts, 100);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canvass.toml");
        std::fs::write(&path, "[database]\npath = \"/tmp/x.db\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database.path, "/tmp/x.db");
    }
}
